use crate::{error::LLMError, HTTPLLMProvider};
use http::{Request, Response};
use serde_json::Value;

pub trait HTTPLLMProviderFactory: Send + Sync {
    fn name(&self) -> &str;

    fn api_key_name(&self) -> Option<String> {
        None
    }

    /// Schema for plugin config
    fn config_schema(&self) -> Value;

    /// Build the HTTP request that lists models.
    fn list_models_request(&self, cfg: &Value) -> Result<Request<Vec<u8>>, LLMError>;

    /// Turn the raw HTTP response into a Vec<String>.
    fn parse_list_models(&self, resp: Response<Vec<u8>>) -> Result<Vec<String>, LLMError>;

    /// Given a chosen model name, build a sync `HttpLLMProvider`
    // FIXME: refactor to follow rust standards
    #[allow(clippy::wrong_self_convention)]
    fn from_config(&self, cfg: &Value) -> Result<Box<dyn HTTPLLMProvider>, LLMError>;
}

/// Parses a 429 response's retry delay into a `reset=<rfc3339>` marker,
/// preferring `retry-after` (seconds) and falling back to the `x-ratelimit-reset-requests`
/// duration format some providers use (e.g. "6m0s", "1s").
pub fn rate_limit_reset_marker(headers: &http::HeaderMap) -> Option<String> {
    let secs = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            headers
                .get("x-ratelimit-reset-requests")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| {
                    if let Some(stripped) = s.strip_suffix('s') {
                        if let Some(m_pos) = stripped.find('m') {
                            stripped[..m_pos].parse::<u64>().ok().map(|m| m * 60)
                        } else {
                            stripped.parse::<u64>().ok()
                        }
                    } else {
                        None
                    }
                })
        })?;
    let reset_at = chrono::Utc::now() + chrono::Duration::seconds(secs as i64);
    Some(reset_at.to_rfc3339())
}

/// Maps a non-2xx HTTP response into an `LLMError`, embedding the status code
/// (and, for 429, a `reset=<rfc3339>` marker) in the message text — the
/// convention the orchestration transport's retry classifier parses back out
/// of the string-typed wire error.
#[macro_export]
macro_rules! handle_http_error {
    ($resp:expr) => {{
        if !$resp.status().is_success() {
            let status = $resp.status();
            let status_code = status.as_u16();
            let reset_marker = if status_code == 429 {
                $crate::plugin::http::rate_limit_reset_marker($resp.headers())
            } else {
                None
            };

            let error_text: String = String::from_utf8($resp.into_body())?;

            // Try to parse JSON and extract error.message for a clean message
            let clean_message =
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&error_text) {
                    json.pointer("/error/message")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("API returned error status: {}", status))
                } else {
                    format!("API returned error status: {}", status)
                };

            let clean_message = match &reset_marker {
                Some(reset) => format!("{} ({} reset={})", clean_message, status_code, reset),
                None => format!("{} ({})", clean_message, status_code),
            };

            // Route to appropriate error variant based on status code
            return Err(match status_code {
                401 | 403 => LLMError::AuthError(clean_message),
                400 => LLMError::InvalidRequest(clean_message),
                500 | 529 => LLMError::ProviderError(format!("Server error: {}", clean_message)),
                _ => LLMError::ProviderError(clean_message),
            });
        }
    }};
}
