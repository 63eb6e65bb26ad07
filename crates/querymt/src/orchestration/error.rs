//! Error kinds for the orchestration core.
//!
//! These are distinct from [`crate::error::LLMError`], which describes wire-level
//! provider/adapter failures. `OrchestrationError` describes failures at the
//! interaction/transport/session layer and wraps `LLMError` where relevant.

use crate::error::LLMError;
use thiserror::Error;

/// Error kinds produced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Auth bootstrap could not fetch runtime config after the retry budget was exhausted.
    #[error("config fetch failed on attempt {attempt}: {message}")]
    ConfigFetch { message: String, attempt: usize },

    /// 400 from the provider. Not retried.
    #[error("bad request to {provider}: {message}")]
    LlmBadRequest { provider: String, message: String },

    /// 413 from the provider. Not retried.
    #[error("request to {provider} exceeded size limits: {message}")]
    LlmOversize { provider: String, message: String },

    /// 429 from the provider. Retried internally by the transport. `reset_at`,
    /// when known, is the vendor-reported instant at which the rate limit
    /// window clears; the transport sleeps `max(reset_at - now, backoff)`.
    #[error("rate limited by {provider}: {message}")]
    LlmRateLimit {
        provider: String,
        message: String,
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// 5xx from the provider. Retried internally by the transport.
    #[error("{provider} server error: {message}")]
    LlmServer { provider: String, message: String },

    /// Any other non-2xx status from the provider.
    #[error("{provider} provider error: {message}")]
    LlmProvider { provider: String, message: String },

    /// Provider reported quota exhaustion via adapter-specific signal.
    #[error("quota exceeded for {provider}: {message}")]
    LlmQuotaExceeded { provider: String, message: String },

    /// Response could not be parsed into the normalized envelope.
    #[error("malformed response from {provider}: {message}")]
    LlmProtocol { provider: String, message: String },

    /// A `tool_use.toolInput` failed JSON-schema validation.
    #[error("tool input validation failed for {tool}: {message}")]
    ValidationToolSchema { tool: String, message: String },

    /// A `tool_use` named a tool that is not registered.
    #[error("tool not found: {tool}")]
    ValidationToolMissing { tool: String },

    /// Serialized tool input/output exceeded the configured size limit.
    #[error("tool payload for {tool} too large: {size} bytes")]
    ValidationToolTooLarge { tool: String, size: usize },

    /// Normalization produced no text and no tool use.
    #[error("empty answer from {provider}")]
    ValidationEmptyAnswer { provider: String },

    /// A session-mutating operation was attempted before the registry was bootstrapped.
    #[error("session registry not initialized")]
    AuthNotInitialized,

    /// An operation required an active `UserAuthSession` that does not exist.
    #[error("no active session for user {user_id}")]
    AuthNoSession { user_id: String },

    /// Cache envelope could not be stored because it exceeded the KV size limit even
    /// after compression. Warn-only: the caller still receives the response.
    #[error("cache entry for {key} too large to store: {size} bytes")]
    CacheOversize { key: String, size: usize },

    /// A non-`LLMError` failure from underneath the transport, annotated with request context.
    #[error("{reason} (provider={provider_name}, model={model}, interaction={interaction_id})")]
    Wrapped {
        reason: String,
        provider_name: String,
        model: String,
        interaction_id: String,
        #[source]
        source: Option<LLMError>,
    },

    /// A caller-provided validator returned `"fatal"`, aborting retries immediately.
    #[error("validator aborted retries: {reason}")]
    ValidatorFatal { reason: String },

    /// Passthrough for a bare `LLMError` that doesn't need additional context.
    #[error(transparent)]
    Provider(#[from] LLMError),
}

impl OrchestrationError {
    /// Status-code-driven classification used by the transport retry loop.
    /// `reset_at` is only meaningful for a 429 classification; it is ignored
    /// (and may be `None`) for every other status.
    pub fn from_status(
        status: u16,
        provider: &str,
        message: impl Into<String>,
        reset_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        let message = message.into();
        match status {
            400 => Self::LlmBadRequest {
                provider: provider.to_string(),
                message,
            },
            413 => Self::LlmOversize {
                provider: provider.to_string(),
                message,
            },
            429 => Self::LlmRateLimit {
                provider: provider.to_string(),
                message,
                reset_at,
            },
            s if s >= 500 => Self::LlmServer {
                provider: provider.to_string(),
                message,
            },
            _ => Self::LlmProvider {
                provider: provider.to_string(),
                message,
            },
        }
    }

    /// Whether the transport's outer retry loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LlmRateLimit { .. } | Self::LlmServer { .. })
    }
}
