//! The `LLMInteraction` state machine: turn/statement accounting, message-append
//! semantics, parameter resolution, and the `speak` entry point (§3, §4.1).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::OrchestrationError;
use super::message::{ContentPart, Message, Role, ToolResultContent};
use super::model_registry::{self, ExplicitParams, InteractionKind, ModelCapabilities, UserPreferences};
use super::persistence::{CacheImpactRecord, DifferentialUsageRecord, PersistenceSink, RawUsageRecord, TokenUsageRecord};
use super::provider::{ExtendedThinking, MessageRequest, NormalizedResponse, Provider};
use super::transport::{self, SpeakOptions};
use super::usage::{CacheImpact, DifferentialUsage, TokenUsage, TokenUsageTriple};

/// Minimal handle standing in for the project/workspace this interaction lives in.
/// The core only needs a stable identity and liveness check; ownership lives
/// elsewhere (§9: "weak back-reference, never ownership").
#[derive(Debug)]
pub struct Collaboration {
    pub id: String,
}

/// Callbacks supplied at `init` time; a `None` here is treated as an incomplete
/// callback set and fails interaction construction fatally (§4.1).
pub trait InteractionCallbacks: Send + Sync {
    fn system_prompt(&self, interaction: &Interaction) -> Vec<String>;
    fn tools(&self, interaction: &Interaction) -> Vec<crate::chat::Tool>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LastUse {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStat {
    pub count: u64,
    pub success: u64,
    pub failure: u64,
    pub last_use: Option<LastUse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Objectives {
    pub overall: Option<String>,
    pub per_statement: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub accessed: HashSet<String>,
    pub modified: HashSet<String>,
    pub active: HashSet<String>,
}

struct MutableState {
    statement_count: u64,
    statement_turn_count: u64,
    interaction_turn_count: u64,
    usage: TokenUsageTriple,
    messages: Vec<Message>,
    objectives: Objectives,
    resource_metrics: ResourceMetrics,
    tool_stats: HashMap<String, ToolStat>,
    model: String,
    max_tokens: u64,
    temperature: f64,
    extended_thinking: ExtendedThinking,
    previous_assistant_input_tokens: u64,
    total_provider_requests: u64,
}

/// A user-bounded multi-turn exchange with one LLM model.
pub struct Interaction {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: InteractionKind,
    collaboration: Weak<Collaboration>,
    callbacks: Arc<dyn InteractionCallbacks>,
    state: Mutex<MutableState>,
}

impl Interaction {
    /// `init(model, callbacks, parentId?)`: fails fatally if `callbacks` is absent.
    pub fn init(
        model: impl Into<String>,
        collaboration: Weak<Collaboration>,
        callbacks: Option<Arc<dyn InteractionCallbacks>>,
        kind: InteractionKind,
        parent_id: Option<String>,
    ) -> Result<Self, OrchestrationError> {
        let callbacks = callbacks.ok_or(OrchestrationError::AuthNotInitialized)?;
        Ok(Self {
            id: ulid::Ulid::new().to_string(),
            parent_id,
            kind,
            collaboration,
            callbacks,
            state: Mutex::new(MutableState {
                statement_count: 0,
                statement_turn_count: 0,
                interaction_turn_count: 0,
                usage: TokenUsageTriple::default(),
                messages: Vec::new(),
                objectives: Objectives::default(),
                resource_metrics: ResourceMetrics::default(),
                tool_stats: HashMap::new(),
                model: model.into(),
                max_tokens: 16384,
                temperature: 0.2,
                extended_thinking: ExtendedThinking::default(),
                previous_assistant_input_tokens: 0,
                total_provider_requests: 0,
            }),
        })
    }

    pub fn is_collaboration_alive(&self) -> bool {
        self.collaboration.strong_count() > 0
    }

    pub fn statement_turn_count(&self) -> u64 {
        self.state.lock().statement_turn_count
    }

    pub fn interaction_turn_count(&self) -> u64 {
        self.state.lock().interaction_turn_count
    }

    pub fn usage(&self) -> TokenUsageTriple {
        self.state.lock().usage.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    /// `addUserContent(part|parts)`: appends into the trailing user message, or
    /// starts a new one.
    pub fn add_user_content(&self, parts: Vec<ContentPart>) -> String {
        let mut state = self.state.lock();
        if let Some(last) = state.messages.last_mut() {
            if last.role == Role::User {
                last.content.extend(parts);
                return last.id.clone();
            }
        }
        let message = Message::new(Role::User, parts);
        let id = message.id.clone();
        state.messages.push(message);
        id
    }

    /// `addAssistantContent`: symmetric to `addUserContent`; logs a diagnostic on
    /// back-to-back assistant messages (never happens in a well-formed exchange).
    pub fn add_assistant_content(
        &self,
        parts: Vec<ContentPart>,
        provider_response: Option<super::message::ProviderResponseSnapshot>,
    ) -> String {
        let mut state = self.state.lock();
        if let Some(last) = state.messages.last() {
            if last.role == Role::Assistant {
                log::warn!(
                    "interaction {}: assistant-after-assistant append; this is a bug",
                    self.id
                );
            }
        }
        let mut message = Message::new(Role::Assistant, parts);
        message.provider_response = provider_response;
        let id = message.id.clone();
        state.messages.push(message);
        id
    }

    /// `addToolResult`: always merged into the trailing user message.
    pub fn add_tool_result(&self, tool_use_id: &str, content: Vec<ToolResultContent>, is_error: bool) {
        let mut state = self.state.lock();
        if state.messages.last().map(|m| m.role) != Some(Role::User) {
            state.messages.push(Message::new(Role::User, Vec::new()));
        }
        let last = state.messages.last_mut().unwrap();
        if let Some(ContentPart::ToolResult {
            content: existing,
            is_error: existing_error,
            ..
        }) = last.tool_result_mut(tool_use_id)
        {
            existing.extend(content);
            *existing_error |= is_error;
        } else {
            last.content.push(ContentPart::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content,
                is_error,
            });
        }
        if is_error {
            last.content.push(ContentPart::text("The tool run failed: see tool_result content"));
        }
    }

    /// Resolves generation parameters per §4.1's priority chain.
    pub fn resolve_params(&self, explicit: &ExplicitParams, user_prefs: &UserPreferences) -> super::model_registry::ResolvedParams {
        let state = self.state.lock();
        let caps = model_registry::get_model_capabilities("local", &state.model);
        model_registry::resolve_params(explicit, user_prefs, self.kind, &caps)
    }

    pub fn model_capabilities(&self) -> ModelCapabilities {
        let state = self.state.lock();
        model_registry::get_model_capabilities("local", &state.model)
    }

    /// `updateTotals(usage, model)`: writes a `TokenUsageRecord`, then accumulates
    /// into statement/interaction triples per the reset rules in §4.1.
    pub fn update_totals(&self, role: Role, usage: TokenUsage, sink: &dyn PersistenceSink) {
        let mut state = self.state.lock();

        if state.interaction_turn_count == 0 {
            state.usage.interaction = TokenUsage::zero();
        }
        if state.statement_turn_count == 0 {
            state.usage.statement = TokenUsage::zero();
        }

        let cache_impact = CacheImpact::compute(&usage);
        let differential = DifferentialUsage::compute(role, &usage, state.previous_assistant_input_tokens);
        if role == Role::Assistant {
            state.previous_assistant_input_tokens = usage.input_tokens;
        }

        state.usage.turn = usage;
        state.usage.statement.add(&usage);
        state.usage.interaction.add(&usage);

        let record = TokenUsageRecord {
            interaction_id: self.id.clone(),
            message_id: state.messages.last().map(|m| m.id.clone()).unwrap_or_default(),
            statement_count: state.statement_count,
            statement_turn_count: state.statement_turn_count,
            timestamp: Utc::now(),
            model: state.model.clone(),
            role,
            raw_usage: RawUsageRecord::from(usage),
            differential_usage: DifferentialUsageRecord::from(differential),
            cache_impact: CacheImpactRecord::from(cache_impact),
        };
        drop(state);

        if let Err(e) = sink.append_token_usage(&record) {
            log::warn!("persistence write failed (swallowed, does not mask LLM response): {e}");
        }
    }

    /// Begins a new user statement: resets the per-statement turn counter and
    /// bumps the statement count.
    pub fn begin_statement(&self, prompt: impl Into<String>) {
        let mut state = self.state.lock();
        state.statement_count += 1;
        state.statement_turn_count = 0;
        state.objectives.per_statement.push(prompt.into());
        state.objectives.timestamp = Some(Utc::now());
    }

    /// Increments the per-statement and lifetime turn counters. Must only be
    /// called for a turn that actually produced a response (§7: a failed turn
    /// leaves these unchanged) and must run *after* `update_totals` for that
    /// same turn, since `update_totals`'s reset check reads these counts
    /// pre-increment.
    fn record_turn(&self) {
        let mut state = self.state.lock();
        state.statement_turn_count += 1;
        state.interaction_turn_count += 1;
    }

    /// Increments the count of provider round-trips attempted. Unlike
    /// `record_turn`, this runs on every attempt regardless of outcome (§7:
    /// "only `totalProviderRequests` increments" on a failed turn).
    fn bump_total_provider_requests(&self) {
        self.state.lock().total_provider_requests += 1;
    }

    pub fn record_tool_use(&self, tool_name: &str, success: bool) {
        let mut state = self.state.lock();
        let stat = state.tool_stats.entry(tool_name.to_string()).or_default();
        stat.count += 1;
        if success {
            stat.success += 1;
        } else {
            stat.failure += 1;
        }
        stat.last_use = Some(LastUse {
            success,
            timestamp: Utc::now(),
        });
    }

    pub fn note_resource_access(&self, path: &str, modified: bool) {
        let mut state = self.state.lock();
        state.resource_metrics.accessed.insert(path.to_string());
        state.resource_metrics.active.insert(path.to_string());
        if modified {
            state.resource_metrics.modified.insert(path.to_string());
        }
    }

    /// `Interaction.speak(prompt, options)`: assembles the request (never holding
    /// the interaction mutex across the adapter call, per §5), drives the
    /// transport, appends the assistant message, and updates accounting.
    ///
    /// Errors from the LLM are never swallowed and are re-thrown to the caller;
    /// on failure, only `total_provider_requests` increments (§7 user-visible
    /// behavior) and prior state is preserved.
    pub async fn speak(
        &self,
        prompt: Vec<ContentPart>,
        provider: &dyn Provider,
        sink: &dyn PersistenceSink,
        explicit: ExplicitParams,
        user_prefs: &UserPreferences,
        options: SpeakOptions<'_>,
    ) -> Result<NormalizedResponse, OrchestrationError> {
        self.begin_statement(prompt_summary(&prompt));
        self.add_user_content(prompt);

        let resolved = self.resolve_params(&explicit, user_prefs);
        self.apply_resolved_params(&resolved);

        let request = self.prepare_message_request();

        let outcome = transport::speak_with_retry(provider, &request, options).await;

        // Per §7, a failed turn leaves the turn counters unchanged; only the
        // count of attempted provider round-trips increments regardless of
        // outcome.
        self.bump_total_provider_requests();

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                log::error!("interaction {} turn failed: {e}", self.id);
                return Err(e);
            }
        };

        self.add_assistant_content(
            response.answer_content.clone(),
            Some(super::provider::snapshot_from_response(&response, response.tools_used.clone())),
        );
        // `update_totals`'s statement/interaction reset check reads the turn
        // counts pre-increment, so it must run before `record_turn`.
        self.update_totals(Role::Assistant, response.usage, sink);
        self.record_turn();

        Ok(response)
    }

    fn apply_resolved_params(&self, resolved: &super::model_registry::ResolvedParams) {
        let mut state = self.state.lock();
        state.max_tokens = resolved.max_tokens;
        state.temperature = resolved.temperature;
        state.extended_thinking = ExtendedThinking {
            enabled: resolved.extended_thinking,
            budget_tokens: resolved.thinking_budget_tokens,
        };
    }

    fn prepare_message_request(&self) -> MessageRequest {
        let state = self.state.lock();
        let system = self.callbacks.system_prompt(self);
        let tools = self.callbacks.tools(self);
        MessageRequest {
            messages: state.messages.clone(),
            system,
            tools,
            model: state.model.clone(),
            max_tokens: state.max_tokens,
            temperature: state.temperature,
            extended_thinking: state.extended_thinking,
            use_prompt_caching: true,
        }
    }
}

fn prompt_summary(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| p.as_text())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::persistence::InMemoryPersistenceSink;

    struct NoopCallbacks;
    impl InteractionCallbacks for NoopCallbacks {
        fn system_prompt(&self, _interaction: &Interaction) -> Vec<String> {
            vec![]
        }
        fn tools(&self, _interaction: &Interaction) -> Vec<crate::chat::Tool> {
            vec![]
        }
    }

    fn test_interaction() -> Interaction {
        let collab = Arc::new(Collaboration { id: "c1".into() });
        Interaction::init(
            "test-model",
            Arc::downgrade(&collab),
            Some(Arc::new(NoopCallbacks)),
            InteractionKind::Chat,
            None,
        )
        .unwrap()
    }

    #[test]
    fn init_fails_without_callbacks() {
        let collab = Arc::new(Collaboration { id: "c1".into() });
        let result = Interaction::init("m", Arc::downgrade(&collab), None, InteractionKind::Chat, None);
        assert!(matches!(result, Err(OrchestrationError::AuthNotInitialized)));
    }

    #[test]
    fn consecutive_user_content_is_coalesced() {
        let interaction = test_interaction();
        interaction.add_user_content(vec![ContentPart::text("hello")]);
        interaction.add_user_content(vec![ContentPart::text("world")]);
        let messages = interaction.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.len(), 2);
    }

    #[test]
    fn tool_result_merges_by_id() {
        let interaction = test_interaction();
        interaction.add_user_content(vec![ContentPart::text("go")]);
        interaction.add_tool_result("t1", vec![ToolResultContent::Text { text: "a".into() }], false);
        interaction.add_tool_result("t1", vec![ToolResultContent::Text { text: "b".into() }], false);
        let messages = interaction.messages();
        let tool_results: Vec<_> = messages
            .last()
            .unwrap()
            .content
            .iter()
            .filter(|p| matches!(p, ContentPart::ToolResult { .. }))
            .collect();
        assert_eq!(tool_results.len(), 1);
        if let ContentPart::ToolResult { content, .. } = tool_results[0] {
            assert_eq!(content.len(), 2);
        }
    }

    #[test]
    fn turn_counters_reset_on_new_statement() {
        let interaction = test_interaction();
        interaction.record_turn();
        interaction.record_turn();
        assert_eq!(interaction.statement_turn_count(), 2);
        interaction.begin_statement("next");
        assert_eq!(interaction.statement_turn_count(), 0);
        assert_eq!(interaction.interaction_turn_count(), 2);
    }

    #[test]
    fn update_totals_accumulates_into_statement_and_interaction() {
        let interaction = test_interaction();
        let sink = InMemoryPersistenceSink::new();
        let usage = TokenUsage::new(10, 5, 0, 0, 0);
        interaction.update_totals(Role::Assistant, usage, &sink);
        let triple = interaction.usage();
        assert_eq!(triple.statement.total_tokens, 15);
        assert_eq!(triple.interaction.total_tokens, 15);
    }

    /// §8 property 2: Σturn.totalTokens over a statement must equal that
    /// statement's own total, not leak in usage from a prior statement. This
    /// requires `update_totals`'s reset check to run, per turn, before that
    /// turn's `record_turn` increments the counters it reads.
    #[test]
    fn statement_usage_does_not_leak_into_next_statement() {
        let interaction = test_interaction();
        let sink = InMemoryPersistenceSink::new();

        interaction.begin_statement("first");
        interaction.update_totals(Role::Assistant, TokenUsage::new(10, 5, 0, 0, 0), &sink);
        interaction.record_turn();
        assert_eq!(interaction.usage().statement.total_tokens, 15);

        interaction.begin_statement("second");
        interaction.update_totals(Role::Assistant, TokenUsage::new(3, 2, 0, 0, 0), &sink);
        interaction.record_turn();
        let triple = interaction.usage();
        assert_eq!(triple.statement.total_tokens, 5);
        assert_eq!(triple.interaction.total_tokens, 20);
    }
}
