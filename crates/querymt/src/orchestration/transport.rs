//! Transport core (§4.3): cache lookup/store, status-code-aware retry with
//! backoff, response normalization, and tool-use validation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use regex::Regex;

use super::cache::{cache_key, CacheStore, DEFAULT_TTL};
use super::error::OrchestrationError;
use super::message::{ContentPart, StopReason, ToolUseRecord};
use super::provider::{MessageRequest, NormalizedResponse, Provider};

const TRANSPORT_MAX_ATTEMPTS: usize = 3;
const VALIDATOR_MAX_ATTEMPTS: usize = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Options threaded through a single `speak_with_retry` call.
pub struct SpeakOptions<'a> {
    pub cache: Option<&'a CacheStore>,
    pub cache_disabled: bool,
    pub tool_registry: &'a HashMap<String, crate::chat::Tool>,
    pub validator: Option<&'a (dyn Fn(&NormalizedResponse) -> Option<String> + Sync)>,
}

impl<'a> Default for SpeakOptions<'a> {
    fn default() -> Self {
        static EMPTY: once_cell::sync::Lazy<HashMap<String, crate::chat::Tool>> =
            once_cell::sync::Lazy::new(HashMap::new);
        Self {
            cache: None,
            cache_disabled: true,
            tool_registry: &EMPTY,
            validator: None,
        }
    }
}

/// Extracts a `reset=<rfc3339-timestamp>` marker out of an `LLMError`'s
/// `Display` text, the convention adapters use to surface a 429's
/// vendor-reported reset instant through the current string-typed wire error
/// (§4.3, §9: rate-limit headers are adapter-populated, not a structured type
/// here). Returns `None` when absent or unparseable.
fn extract_reset_at(text: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"reset=(\S+)").unwrap();
    let captured = re.captures(text)?;
    DateTime::parse_from_rfc3339(&captured[1])
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Extracts a first 3-digit HTTP-looking status code out of an `LLMError`'s
/// `Display` text, since the underlying wire errors are string-typed. Falls back
/// to the non-retryable `LLM.Provider` classification when none is found (§4.3:
/// "other -> non-retryable").
fn classify_provider_error(err: OrchestrationError, provider: &str) -> OrchestrationError {
    if let OrchestrationError::Provider(llm_err) = &err {
        let text = llm_err.to_string();
        let re = Regex::new(r"\b([45]\d{2})\b").unwrap();
        if let Some(m) = re.captures(&text) {
            if let Ok(status) = m[1].parse::<u16>() {
                let reset_at = if status == 429 { extract_reset_at(&text) } else { None };
                return OrchestrationError::from_status(status, provider, text, reset_at);
            }
        }
    }
    err
}

/// `prepareMessageRequest` defaults: missing `maxTokens`/`temperature` fall
/// through to 16384 / 0.2.
pub fn apply_hard_defaults(request: &mut MessageRequest) {
    if request.max_tokens == 0 {
        request.max_tokens = 16384;
    }
}

/// `speakWithPlus`: cache lookup, retry loop with status-code policy, and
/// response normalization (§4.3).
pub async fn speak_with_plus(
    provider: &dyn Provider,
    request: &MessageRequest,
    cache: Option<&CacheStore>,
    cache_disabled: bool,
) -> Result<NormalizedResponse, OrchestrationError> {
    let wire_request = provider.as_provider_message_request(request);
    let key = cache_key("messageRequest", provider.name(), &wire_request);

    if !cache_disabled {
        if let Some(store) = cache {
            if let Some(cached) = store.get(&key)? {
                if let Ok(mut response) = serde_json::from_value::<NormalizedResponse>(cached) {
                    response.from_cache = true;
                    return Ok(response);
                }
            }
        }
    }

    let mut backoff = INITIAL_BACKOFF;
    let mut last_error: Option<OrchestrationError> = None;

    for attempt in 1..=TRANSPORT_MAX_ATTEMPTS {
        match provider.speak_with(request).await {
            Ok(response) => {
                if !cache_disabled {
                    if let Some(store) = cache {
                        let serialized = serde_json::to_value(&response).unwrap_or_default();
                        if let Err(e) = store.set(&key, &serialized, DEFAULT_TTL) {
                            log::warn!("cache write skipped: {e}");
                        }
                    }
                }
                return Ok(response);
            }
            Err(e) => {
                let classified = classify_provider_error(e, provider.name());
                match &classified {
                    OrchestrationError::LlmBadRequest { .. } | OrchestrationError::LlmOversize { .. } => {
                        return Err(classified);
                    }
                    OrchestrationError::LlmRateLimit { reset_at, .. } => {
                        let mut sleep_for = backoff;
                        if let Some(reset_at) = reset_at {
                            if let Ok(until_reset) = (*reset_at - Utc::now()).to_std() {
                                sleep_for = sleep_for.max(until_reset);
                            }
                        }
                        tokio::time::sleep(sleep_for).await;
                    }
                    OrchestrationError::LlmServer { .. } => {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    _ => {
                        return Err(classified);
                    }
                }
                last_error = Some(classified);
                if attempt == TRANSPORT_MAX_ATTEMPTS {
                    break;
                }
            }
        }
    }

    Err(last_error.unwrap_or(OrchestrationError::LlmProtocol {
        provider: provider.name().to_string(),
        message: "exhausted transport retries with no captured error".to_string(),
    }))
}

/// A validation failure plus enough context to drive `modifyOptionsOnValidationFailure`.
struct ValidationFailure {
    reason: String,
    tool_use_id: Option<String>,
}

/// Validates every `tool_use` in `response` against its registered tool's
/// JSON schema (§4.3). Returns the validated `ToolUseRecord` for each tool use
/// encountered (§8 property 6: `validated == true` for every one of them after
/// transport return) alongside the first validation failure, if any.
fn validate_tool_uses(
    response: &NormalizedResponse,
    tool_registry: &HashMap<String, crate::chat::Tool>,
) -> (Vec<ToolUseRecord>, Option<ValidationFailure>) {
    if response.message_stop.stop_reason == StopReason::MaxTokens && response.is_tool {
        return (
            Vec::new(),
            Some(ValidationFailure {
                reason: "Tool exceeded max tokens".to_string(),
                tool_use_id: None,
            }),
        );
    }

    let mut failure = None;
    let mut records = Vec::new();

    for part in response.answer_content.iter() {
        let ContentPart::ToolUse { id, name, input } = part else {
            continue;
        };
        let mut record = ToolUseRecord::new(id.clone(), name.clone(), input.clone());

        let Some(tool) = tool_registry.get(name) else {
            let reason = format!("Tool not found: {name}");
            failure.get_or_insert(ValidationFailure {
                reason: reason.clone(),
                tool_use_id: Some(id.clone()),
            });
            record.mark_validated(reason);
            records.push(record);
            continue;
        };
        let schema = &tool.function.parameters;
        let validation_result = match validator_for(schema) {
            Ok(validator) => {
                let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors.join("; "))
                }
            }
            Err(e) => Err(format!("invalid tool schema: {e}")),
        };

        match validation_result {
            Ok(()) => record.mark_validated(""),
            Err(msg) => {
                let full_reason = format!("Tool input validation failed: {msg}");
                failure.get_or_insert(ValidationFailure {
                    reason: full_reason.clone(),
                    tool_use_id: Some(id.clone()),
                });
                record.mark_validated(full_reason);
            }
        }
        records.push(record);
    }

    (records, failure)
}

/// Appends the assistant's failed attempt plus a synthesized, guiding
/// `tool_result` (or a request for a smaller answer) to `request.messages`, so
/// the next retry attempt has the context needed to self-correct (§4.3).
fn inject_validation_guidance(request: &mut MessageRequest, response: &NormalizedResponse, failure: &ValidationFailure) {
    request.messages.push(super::message::Message::new(
        super::message::Role::Assistant,
        response.answer_content.clone(),
    ));

    let guidance = if failure.reason == "Tool exceeded max tokens" {
        vec![ContentPart::text(
            "The previous answer was truncated before the tool call completed. Please provide a smaller answer.",
        )]
    } else if let Some(tool_use_id) = &failure.tool_use_id {
        vec![ContentPart::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: vec![super::message::ToolResultContent::Text {
                text: format!("The tool run failed: {}", failure.reason),
            }],
            is_error: true,
        }]
    } else {
        vec![ContentPart::text(format!("The tool run failed: {}", failure.reason))]
    };

    request
        .messages
        .push(super::message::Message::new(super::message::Role::User, guidance));
}

/// `speakWithRetry`: wraps `speakWithPlus` up to `VALIDATOR_MAX_ATTEMPTS` attempts,
/// running the tool/empty-answer validator after each success (§4.3, scenario S2).
pub async fn speak_with_retry(
    provider: &dyn Provider,
    request: &MessageRequest,
    options: SpeakOptions<'_>,
) -> Result<NormalizedResponse, OrchestrationError> {
    let mut request = request.clone();
    apply_hard_defaults(&mut request);

    for _attempt in 1..=VALIDATOR_MAX_ATTEMPTS {
        let mut response = speak_with_plus(provider, &request, options.cache, options.cache_disabled).await?;

        let (tool_records, mut failure) = validate_tool_uses(&response, options.tool_registry);
        response.tools_used = tool_records;

        if failure.is_none() && response.answer.trim().is_empty() && !response.is_tool {
            failure = Some(ValidationFailure {
                reason: "Empty answer".to_string(),
                tool_use_id: None,
            });
        }

        if failure.is_none() {
            if let Some(validator) = options.validator {
                if let Some(custom_reason) = validator(&response) {
                    if custom_reason == "fatal" {
                        return Err(OrchestrationError::ValidatorFatal {
                            reason: custom_reason,
                        });
                    }
                    failure = Some(ValidationFailure {
                        reason: custom_reason,
                        tool_use_id: None,
                    });
                }
            }
        }

        match failure {
            None => return Ok(response),
            Some(failure) => {
                provider.modify_options_on_validation_failure(&mut request, &failure.reason);
                if failure.reason == "Empty answer" {
                    request.temperature = (request.temperature + 0.1).min(1.0);
                } else {
                    inject_validation_guidance(&mut request, &response, &failure);
                }
            }
        }
    }

    let mut response = speak_with_plus(provider, &request, options.cache, options.cache_disabled).await?;
    let (tool_records, _) = validate_tool_uses(&response, options.tool_registry);
    response.tools_used = tool_records;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::message::Role;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn speak_with(&self, _request: &MessageRequest) -> Result<NormalizedResponse, OrchestrationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(OrchestrationError::Provider(crate::error::LLMError::HttpError(
                    "503 Service Unavailable".to_string(),
                )));
            }
            Ok(NormalizedResponse {
                id: "r1".into(),
                model: "m".into(),
                from_cache: false,
                timestamp: chrono::Utc::now(),
                answer: "hi".into(),
                answer_content: vec![ContentPart::text("hi")],
                is_tool: false,
                message_stop: super::super::provider::MessageStop {
                    stop_reason: StopReason::EndTurn,
                    stop_sequence: None,
                },
                usage: Default::default(),
                rate_limit: Default::default(),
                provider_message_response_meta: super::super::provider::ProviderResponseMeta {
                    status_code: 200,
                    status_text: "OK".into(),
                },
                tools_used: Vec::new(),
            })
        }

        fn as_provider_message_request(&self, request: &MessageRequest) -> serde_json::Value {
            serde_json::json!({"model": request.model})
        }
    }

    /// Fails with a 429 carrying a `reset=` marker `delay` in the future, then succeeds.
    struct RateLimitedProvider {
        calls: AtomicUsize,
        reset_at: DateTime<Utc>,
    }

    #[async_trait]
    impl Provider for RateLimitedProvider {
        fn name(&self) -> &str {
            "rate-limited"
        }

        async fn speak_with(&self, _request: &MessageRequest) -> Result<NormalizedResponse, OrchestrationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(OrchestrationError::Provider(crate::error::LLMError::HttpError(format!(
                    "429 Too Many Requests (reset={})",
                    self.reset_at.to_rfc3339()
                ))));
            }
            Ok(NormalizedResponse {
                id: "r1".into(),
                model: "m".into(),
                from_cache: false,
                timestamp: Utc::now(),
                answer: "hi".into(),
                answer_content: vec![ContentPart::text("hi")],
                is_tool: false,
                message_stop: super::super::provider::MessageStop {
                    stop_reason: StopReason::EndTurn,
                    stop_sequence: None,
                },
                usage: Default::default(),
                rate_limit: Default::default(),
                provider_message_response_meta: super::super::provider::ProviderResponseMeta {
                    status_code: 200,
                    status_text: "OK".into(),
                },
                tools_used: Vec::new(),
            })
        }

        fn as_provider_message_request(&self, request: &MessageRequest) -> serde_json::Value {
            serde_json::json!({"model": request.model})
        }
    }

    fn empty_request() -> MessageRequest {
        MessageRequest {
            messages: vec![],
            system: vec![],
            tools: vec![],
            model: "m".into(),
            max_tokens: 0,
            temperature: 0.2,
            extended_thinking: Default::default(),
            use_prompt_caching: false,
        }
    }

    #[tokio::test]
    async fn retries_on_server_error_and_succeeds() {
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: 1,
        };
        let request = empty_request();
        let response = speak_with_plus(&provider, &request, None, true).await.unwrap();
        assert_eq!(response.answer, "hi");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hard_defaults_fill_missing_max_tokens() {
        let mut request = empty_request();
        apply_hard_defaults(&mut request);
        assert_eq!(request.max_tokens, 16384);
    }

    #[test]
    fn classify_maps_status_codes() {
        let err = OrchestrationError::Provider(crate::error::LLMError::HttpError("400 Bad Request".into()));
        assert!(matches!(
            classify_provider_error(err, "p"),
            OrchestrationError::LlmBadRequest { .. }
        ));
    }

    #[test]
    fn classify_extracts_rate_limit_reset_date() {
        let reset_at = Utc::now() + chrono::Duration::milliseconds(500);
        let err = OrchestrationError::Provider(crate::error::LLMError::HttpError(format!(
            "429 Too Many Requests (reset={})",
            reset_at.to_rfc3339()
        )));
        match classify_provider_error(err, "p") {
            OrchestrationError::LlmRateLimit { reset_at: Some(got), .. } => {
                assert!((got - reset_at).num_milliseconds().abs() < 5);
            }
            other => panic!("expected LlmRateLimit with reset_at, got {other:?}"),
        }
    }

    /// S3: a 429 with `reset=now+500ms` must sleep at least 500ms before retrying,
    /// and succeed on attempt 2.
    #[tokio::test]
    async fn rate_limit_sleeps_until_reset_date_and_retries() {
        let provider = RateLimitedProvider {
            calls: AtomicUsize::new(0),
            reset_at: Utc::now() + chrono::Duration::milliseconds(500),
        };
        let request = empty_request();
        let started = std::time::Instant::now();
        let response = speak_with_plus(&provider, &request, None, true).await.unwrap();
        assert_eq!(response.answer, "hi");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[allow(unused)]
    fn use_role(_: Role) {}
}
