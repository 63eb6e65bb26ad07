//! Auth bootstrap: fetches runtime config from a remote endpoint with bounded
//! retry, validates it, and produces authenticated per-schema clients.
//!
//! Grounded on `crate::providers::registry`'s fetch-validate-cache shape and
//! `crate::auth::ApiKeyResolver`'s async-refresh pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::OrchestrationError;

const DEFAULT_SUPABASE_CONFIG_URL: &str = "https://config.query.mt/supabase.json";

/// Runtime config fetched from the remote endpoint (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub url: String,
    #[serde(rename = "anonKey")]
    pub anon_key: String,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub url: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            url: None,
        }
    }
}

/// Source of the built-in/global-config URL fallback, kept narrow so callers can
/// inject config-manager lookups without this module depending on a config crate.
pub trait GlobalConfigUrl: Send + Sync {
    fn supabase_config_url(&self) -> Option<String>;
}

fn validate_config(value: &serde_json::Value) -> Result<SupabaseConfig, String> {
    let config: SupabaseConfig =
        serde_json::from_value(value.clone()).map_err(|e| format!("invalid config shape: {e}"))?;
    if config.url.trim().is_empty() || url::Url::parse(&config.url).is_err() {
        return Err("url must be a valid, non-empty URL".to_string());
    }
    let key_re = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
    if !key_re.is_match(&config.anon_key) {
        return Err("anonKey does not match required pattern".to_string());
    }
    Ok(config)
}

/// `fetchSupabaseConfig` (§4.5): resolves the URL, attempts an HTTPS GET with
/// bounded retry, and validates the response body. Pure with respect to
/// external state on success.
pub async fn fetch_supabase_config(
    opts: FetchOptions,
    global_config: Option<&dyn GlobalConfigUrl>,
) -> Result<SupabaseConfig, OrchestrationError> {
    let url = opts
        .url
        .clone()
        .or_else(|| global_config.and_then(|g| g.supabase_config_url()))
        .unwrap_or_else(|| DEFAULT_SUPABASE_CONFIG_URL.to_string());

    let client = reqwest::Client::new();
    let mut last_error = String::new();

    for attempt in 1..=opts.max_retries {
        match try_fetch_once(&client, &url).await {
            Ok(config) => return Ok(config),
            Err(e) => {
                last_error = e;
                if attempt == opts.max_retries {
                    return Err(OrchestrationError::ConfigFetch {
                        message: last_error,
                        attempt,
                    });
                }
                tokio::time::sleep(opts.retry_delay).await;
            }
        }
    }

    Err(OrchestrationError::ConfigFetch {
        message: last_error,
        attempt: opts.max_retries,
    })
}

async fn try_fetch_once(client: &reqwest::Client, url: &str) -> Result<SupabaseConfig, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("non-2xx status: {}", response.status()));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("invalid JSON body: {e}"))?;
    validate_config(&body)
}

/// Caches clients by `(schema, auth?)`. `useAuth` attaches per-user auth storage
/// and enables auto-refresh; otherwise a read-only anon client is built.
pub struct SupabaseClientFactory {
    config: SupabaseConfig,
    clients: Mutex<HashMap<(String, bool), Arc<SupabaseClient>>>,
}

/// Opaque handle representing a configured Supabase (or compatible) client for a
/// logical schema. The core treats this as a collaborator and does not implement
/// the actual PostgREST/auth wire protocol.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    pub schema: String,
    pub base_url: String,
    pub anon_key: String,
    pub authenticated: bool,
}

impl SupabaseClientFactory {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, schema: &str, use_auth: bool) -> Arc<SupabaseClient> {
        let key = (schema.to_string(), use_auth);
        let mut clients = self.clients.lock();
        clients
            .entry(key)
            .or_insert_with(|| {
                Arc::new(SupabaseClient {
                    schema: schema.to_string(),
                    base_url: self.config.url.clone(),
                    anon_key: self.config.anon_key.clone(),
                    authenticated: use_auth,
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        let value = serde_json::json!({"url": "not a url", "anonKey": "abc.def-123"});
        assert!(validate_config(&value).is_err());
    }

    #[test]
    fn rejects_bad_anon_key_chars() {
        let value = serde_json::json!({"url": "https://ex.supabase.co", "anonKey": "abc def"});
        assert!(validate_config(&value).is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let value = serde_json::json!({"url": "https://ex.supabase.co", "anonKey": "abc.def-123"});
        let config = validate_config(&value).unwrap();
        assert_eq!(config.url, "https://ex.supabase.co");
    }

    #[test]
    fn client_factory_caches_by_schema_and_auth() {
        let factory = SupabaseClientFactory::new(SupabaseConfig {
            url: "https://ex.supabase.co".into(),
            anon_key: "abc.def-123".into(),
        });
        let a = factory.get_or_create("public", true);
        let b = factory.get_or_create("public", true);
        assert!(Arc::ptr_eq(&a, &b));
        let c = factory.get_or_create("public", false);
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
