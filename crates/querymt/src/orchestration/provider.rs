//! Provider abstraction (§4.2): a common `speak_with` contract implemented by
//! concrete vendor adapters. Rather than duplicating translation logic, the
//! adapter here wraps any existing [`crate::LLMProvider`] (the querymt chat
//! adapters for Anthropic-shape, OpenAI-shape, Google, Groq, local ONN/Ollama,
//! and the authoritative proxy) and normalizes its responses into this core's
//! `NormalizedResponse`/`StopReason` shapes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatRole, FinishReason, MessageType};
use crate::{LLMProvider, ToolCall, Usage};

use super::error::OrchestrationError;
use super::message::{ContentPart, Message, ProviderResponseSnapshot, Role, StopReason, ToolUseRecord};
use super::usage::TokenUsage;

/// `{enabled, budgetTokens}` (§3 Interaction model/parameters).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExtendedThinking {
    pub enabled: bool,
    pub budget_tokens: Option<u64>,
}

/// Assembled request handed to a provider, built by `prepareMessageRequest` (§4.3).
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub messages: Vec<Message>,
    pub system: Vec<String>,
    pub tools: Vec<crate::chat::Tool>,
    pub model: String,
    pub max_tokens: u64,
    pub temperature: f64,
    pub extended_thinking: ExtendedThinking,
    pub use_prompt_caching: bool,
}

/// Rate-limit bookkeeping populated by adapters that receive rate-limit headers
/// (§4.3). `known=false` means the vendor did not report the field; per §9 this
/// must be distinguished from "exhausted" (zero).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub known: bool,
    pub requests_remaining: u64,
    pub requests_limit: u64,
    pub requests_reset_date: Option<chrono::DateTime<chrono::Utc>>,
    pub tokens_remaining: u64,
    pub tokens_limit: u64,
    pub tokens_reset_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStop {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponseMeta {
    pub status_code: u16,
    pub status_text: String,
}

/// The normalized response envelope (§4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub id: String,
    pub model: String,
    pub from_cache: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub answer: String,
    pub answer_content: Vec<ContentPart>,
    pub is_tool: bool,
    pub message_stop: MessageStop,
    pub usage: TokenUsage,
    pub rate_limit: RateLimitInfo,
    pub provider_message_response_meta: ProviderResponseMeta,
    /// Tool uses extracted from `answer_content`, carrying each one's validation
    /// outcome (§3 ToolUse record, §8 property 6). Populated by transport's
    /// `validate_tool_uses` before the response is returned from
    /// `speak_with_retry`; adapters populate it with unvalidated records as a
    /// starting point.
    #[serde(default)]
    pub tools_used: Vec<ToolUseRecord>,
}

/// Common contract implemented by concrete provider adapters (§4.2).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// One atomic provider round-trip: request -> normalized response.
    async fn speak_with(&self, request: &MessageRequest) -> Result<NormalizedResponse, OrchestrationError>;

    /// Translates the internal request into the vendor wire shape, used for
    /// logging and for computing the cache key's canonical JSON.
    fn as_provider_message_request(&self, request: &MessageRequest) -> serde_json::Value;

    /// Optional hook: called by the transport when a validator rejects a turn.
    fn modify_options_on_validation_failure(&self, _request: &mut MessageRequest, _reason: &str) {}

    /// Optional hook: lets an adapter override stop-reason normalization.
    fn check_stop_reason(&self, _response: &NormalizedResponse) -> Option<StopReason> {
        None
    }
}

/// Maps a vendor-normalized [`FinishReason`] (already normalized once by the
/// querymt chat adapter) onto the core's [`StopReason`] set (§4.2).
fn normalize_finish_reason(reason: Option<FinishReason>, is_tool: bool) -> StopReason {
    match reason {
        Some(FinishReason::Stop) => StopReason::EndTurn,
        Some(FinishReason::Length) => StopReason::MaxTokens,
        Some(FinishReason::ContentFilter) => StopReason::ContentFilter,
        Some(FinishReason::ToolCalls) => StopReason::ToolCalls,
        Some(FinishReason::Error) => StopReason::Other("error".to_string()),
        Some(FinishReason::Other) => StopReason::Other("other".to_string()),
        Some(FinishReason::Unknown) => {
            log::warn!("unknown finish reason from provider, passing through");
            StopReason::Other("unknown".to_string())
        }
        None if is_tool => StopReason::ToolUse,
        None => StopReason::Null,
    }
}

fn usage_from_wire(usage: Option<Usage>) -> TokenUsage {
    match usage {
        Some(u) => TokenUsage::new(u.input_tokens as u64, u.output_tokens as u64, 0, 0, 0),
        None => TokenUsage::zero(),
    }
}

/// Flattens a core `Message` into the teacher-shaped `ChatMessage` list consumed
/// by [`crate::LLMProvider`]. Each content part becomes its own `ChatMessage`;
/// role mapping is direct (user/assistant only, per §3).
fn flatten_message(message: &Message) -> Vec<ChatMessage> {
    let role = match message.role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
    };
    message
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text, .. } => ChatMessage {
                role: role.clone(),
                message_type: MessageType::Text,
                content: text.clone(),
            },
            ContentPart::Thinking { text, .. } => ChatMessage {
                role: role.clone(),
                message_type: MessageType::Text,
                content: text.clone(),
            },
            ContentPart::RedactedThinking { .. } => ChatMessage {
                role: role.clone(),
                message_type: MessageType::Text,
                content: String::new(),
            },
            ContentPart::Image { data, media_type, .. } => {
                let mime = if media_type.contains("png") {
                    crate::chat::ImageMime::PNG
                } else if media_type.contains("gif") {
                    crate::chat::ImageMime::GIF
                } else if media_type.contains("webp") {
                    crate::chat::ImageMime::WEBP
                } else {
                    crate::chat::ImageMime::JPEG
                };
                ChatMessage {
                    role: role.clone(),
                    message_type: MessageType::Image((mime, data.as_bytes().to_vec())),
                    content: String::new(),
                }
            }
            ContentPart::ToolUse { id, name, input } => ChatMessage {
                role: role.clone(),
                message_type: MessageType::ToolUse(vec![ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: crate::FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                }]),
                content: String::new(),
            },
            ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let text = content
                    .iter()
                    .filter_map(|c| match c {
                        super::message::ToolResultContent::Text { text } => Some(text.clone()),
                        super::message::ToolResultContent::Image { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ChatMessage {
                    role: role.clone(),
                    message_type: MessageType::ToolResult(vec![ToolCall {
                        id: tool_use_id.clone(),
                        call_type: "function".to_string(),
                        function: crate::FunctionCall {
                            name: String::new(),
                            arguments: text.clone(),
                        },
                    }]),
                    content: text,
                }
            }
        })
        .collect()
}

/// Wraps an existing [`LLMProvider`] adapter to satisfy the [`Provider`] contract.
pub struct LLMProviderAdapter {
    provider_name: String,
    inner: Arc<dyn LLMProvider>,
}

impl LLMProviderAdapter {
    pub fn new(provider_name: impl Into<String>, inner: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider_name: provider_name.into(),
            inner,
        }
    }
}

#[async_trait]
impl Provider for LLMProviderAdapter {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn speak_with(&self, request: &MessageRequest) -> Result<NormalizedResponse, OrchestrationError> {
        let chat_messages: Vec<ChatMessage> = request
            .messages
            .iter()
            .flat_map(flatten_message)
            .collect();

        let response = if request.tools.is_empty() {
            self.inner.chat(&chat_messages).await
        } else {
            self.inner.chat_with_tools(&chat_messages, Some(&request.tools)).await
        }
        .map_err(OrchestrationError::Provider)?;

        let tool_calls = response.tool_calls();
        let is_tool = tool_calls.as_ref().map(|c| !c.is_empty()).unwrap_or(false);
        let stop_reason = normalize_finish_reason(response.finish_reason(), is_tool);

        let mut answer_content = Vec::new();
        if let Some(text) = response.text() {
            if !text.is_empty() {
                answer_content.push(ContentPart::text(text));
            }
        }
        let mut tools_used = Vec::new();
        if let Some(calls) = tool_calls {
            for call in calls {
                let input: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);
                answer_content.push(ContentPart::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: input.clone(),
                });
                tools_used.push(ToolUseRecord::new(call.id, call.function.name, input));
            }
        }

        if answer_content.is_empty() {
            log::warn!("provider {} returned no text content", self.provider_name);
            answer_content.push(ContentPart::text("Error: No valid text content found"));
        }

        let answer = if is_tool {
            tools_used
                .iter()
                .filter_map(|t| t.tool_thinking.clone())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            answer_content
                .iter()
                .filter_map(|p| p.as_text())
                .collect::<Vec<_>>()
                .join("")
        };

        Ok(NormalizedResponse {
            id: ulid::Ulid::new().to_string(),
            model: request.model.clone(),
            from_cache: false,
            timestamp: chrono::Utc::now(),
            answer,
            answer_content,
            is_tool,
            message_stop: MessageStop {
                stop_reason,
                stop_sequence: None,
            },
            usage: usage_from_wire(response.usage()),
            rate_limit: RateLimitInfo::default(),
            provider_message_response_meta: ProviderResponseMeta {
                status_code: 200,
                status_text: "OK".to_string(),
            },
            tools_used,
        })
    }

    fn as_provider_message_request(&self, request: &MessageRequest) -> serde_json::Value {
        serde_json::json!({
            "provider": self.provider_name,
            "model": request.model,
            "system": request.system,
            "tools": request.tools,
            "maxTokens": request.max_tokens,
            "temperature": request.temperature,
            "extendedThinking": request.extended_thinking,
            "usePromptCaching": request.use_prompt_caching,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
        })
    }
}

pub fn snapshot_from_response(response: &NormalizedResponse, tools_used: Vec<ToolUseRecord>) -> ProviderResponseSnapshot {
    ProviderResponseSnapshot {
        id: response.id.clone(),
        model: response.model.clone(),
        stop_reason: response.message_stop.stop_reason.clone(),
        stop_sequence: None,
        tools_used,
    }
}
