//! Portable text: the normalized message/content representation shared across providers.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Role of a participant in an interaction's message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Tagged content part. Adapters translate to/from vendor shapes at the boundary;
/// everything above the provider layer only ever sees these variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        citations: Option<serde_json::Value>,
    },
    Image {
        data: String,
        media_type: String,
        #[serde(default = "default_encoding")]
        encoding: String,
    },
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ToolResultContent>,
        is_error: bool,
    },
}

fn default_encoding() -> String {
    "base64".to_string()
}

/// The restricted content allowed inside a `tool_result` part: text or image only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    Image { data: String, media_type: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            citations: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentPart::ToolUse { .. })
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentPart::ToolUse { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Normalized stop reason, shared across vendor adapters (see §4.2 stop-reason
/// normalization). Unknown vendor reasons are logged and carried through verbatim
/// via `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    ToolUse,
    ContentFilter,
    Refusal,
    ToolCalls,
    Other(String),
    Null,
}

/// A snapshot of a provider's response, attached to the assistant message that it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponseSnapshot {
    pub id: String,
    pub model: String,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub tools_used: Vec<ToolUseRecord>,
}

/// A single tool invocation as tracked through validation to result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_thinking: Option<String>,
    pub tool_validation: ToolValidation,
}

/// Invariant: `validated` transitions `false -> true` exactly once, before the
/// corresponding `tool_result` part is appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolValidation {
    pub validated: bool,
    pub results: String,
}

impl ToolUseRecord {
    pub fn new(tool_use_id: impl Into<String>, tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            tool_input: input,
            tool_thinking: None,
            tool_validation: ToolValidation::default(),
        }
    }

    /// Marks this record validated. `results` is empty iff the input passed schema validation.
    pub fn mark_validated(&mut self, results: impl Into<String>) {
        self.tool_validation.validated = true;
        self.tool_validation.results = results.into();
    }
}

/// A single message in an interaction's ordered log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_response: Option<ProviderResponseSnapshot>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_stats: Option<serde_json::Value>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            role,
            content,
            provider_response: None,
            timestamp: chrono::Utc::now(),
            interaction_stats: None,
        }
    }

    /// Finds the trailing `tool_result` part matching `id`, if any.
    pub fn tool_result_mut(&mut self, tool_use_id: &str) -> Option<&mut ContentPart> {
        self.content.iter_mut().find(|part| {
            matches!(part, ContentPart::ToolResult { tool_use_id: id, .. } if id == tool_use_id)
        })
    }
}
