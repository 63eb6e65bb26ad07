//! Per-user session and API-token registry (§4.4).
//!
//! The registry is a process-wide singleton, but every mutating operation takes
//! an explicit `UserContext`/`userId` rather than relying on ambient state — per
//! §9's design note, the "current context" pointer here is a read-only
//! convenience, never a substitute for explicit passing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::OrchestrationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// `UserAuthSession` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAuthSession {
    pub user: AuthUser,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl UserAuthSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Request-scoped context, passed explicitly down the stack (§4.4, §9).
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub session: Arc<UserAuthSession>,
    pub project_id: Option<String>,
    pub collaboration_id: Option<String>,
    pub interaction_id: Option<String>,
}

/// `ApiToken` (§3). Token string format: `bb_{tokenId}_{secret}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub user_id: String,
    pub token_id: Uuid,
    pub scopes: std::collections::BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl ApiToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|e| Utc::now() >= e).unwrap_or(false)
    }
}

const TOKEN_PREFIX: &str = "bb";

fn default_scopes() -> std::collections::BTreeSet<String> {
    std::collections::BTreeSet::from(["default".to_string()])
}

/// Process-wide singleton mapping user-id -> session and token-string -> token record.
///
/// Locking discipline mirrors §5: the registry maps are protected by a
/// registry-level mutex, while the current-context pointer is a read-only
/// convenience set by request middleware.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<UserAuthSession>>>,
    tokens: Mutex<HashMap<String, ApiToken>>,
    current_context: RwLock<Option<UserContext>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            current_context: RwLock::new(None),
        }
    }

    /// Idempotent: re-registering a user replaces their existing session.
    pub fn register_session(&self, user_id: &str, session: UserAuthSession) -> Arc<UserAuthSession> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .insert(user_id.to_string(), session.clone());
        session
    }

    pub fn session_for(&self, user_id: &str) -> Option<Arc<UserAuthSession>> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Clears the session and evicts all API tokens belonging to `user_id`.
    pub fn remove_session(&self, user_id: &str) {
        self.sessions.write().remove(user_id);
        self.tokens.lock().retain(|_, t| t.user_id != user_id);
    }

    /// Awaits destroy of all sessions concurrently; failures are logged, not propagated.
    pub async fn shutdown(&self) {
        let user_ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        let destroys = user_ids.into_iter().map(|user_id| async move {
            self.remove_session(&user_id);
        });
        futures::future::join_all(destroys).await;
    }

    /// Generates a new API token for `user_id`. Requires an active session.
    pub fn generate_token(
        &self,
        user_id: &str,
        scopes: Option<std::collections::BTreeSet<String>>,
        ttl: Option<Duration>,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, OrchestrationError> {
        if self.session_for(user_id).is_none() {
            return Err(OrchestrationError::AuthNoSession {
                user_id: user_id.to_string(),
            });
        }
        let token_id = Uuid::new_v4();
        let secret = Uuid::new_v4();
        let token_string = format!("{TOKEN_PREFIX}_{token_id}_{secret}");
        let expires_at = ttl.map(|d| Utc::now() + chrono::Duration::from_std(d).unwrap_or_default());

        self.tokens.lock().insert(
            token_string.clone(),
            ApiToken {
                user_id: user_id.to_string(),
                token_id,
                scopes: scopes.unwrap_or_else(default_scopes),
                expires_at,
                metadata,
            },
        );
        Ok(token_string)
    }

    /// Validates `token`: rejects non-`bb_`-prefixed strings, purges on expiry,
    /// and requires a live session for the associated user.
    pub fn validate_token(&self, token: &str) -> Option<ApiToken> {
        if !token.starts_with(&format!("{TOKEN_PREFIX}_")) {
            return None;
        }
        let mut tokens = self.tokens.lock();
        let record = tokens.get(token)?;
        if record.is_expired() {
            tokens.remove(token);
            return None;
        }
        let record = record.clone();
        drop(tokens);
        if self.session_for(&record.user_id).is_none() {
            return None;
        }
        Some(record)
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.lock().remove(token);
    }

    pub fn revoke_all_for(&self, user_id: &str) {
        self.tokens.lock().retain(|_, t| t.user_id != user_id);
    }

    /// Scans for and removes all expired tokens.
    pub fn cleanup(&self) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired());
        before - tokens.len()
    }

    /// Sets the process-wide "current context" pointer. Convenience for
    /// leaf-level read access only; mutating operations must take `UserContext`
    /// explicitly rather than reading this back.
    pub fn set_current_context(&self, ctx: Option<UserContext>) {
        *self.current_context.write() = ctx;
    }

    pub fn current_context(&self) -> Option<UserContext> {
        self.current_context.read().clone()
    }

    /// Saves/restores the current-context pointer around `f`, per §4.4's
    /// `withUserContext`.
    pub fn with_user_context<F, R>(&self, ctx: UserContext, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let previous = self.current_context.read().clone();
        self.set_current_context(Some(ctx));
        let result = f();
        self.set_current_context(previous);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> UserAuthSession {
        UserAuthSession {
            user: AuthUser {
                id: "u1".into(),
                email: "u1@example.com".into(),
            },
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn token_format_has_bb_prefix() {
        let registry = SessionRegistry::new();
        registry.register_session("u1", test_session());
        let token = registry.generate_token("u1", None, None, None).unwrap();
        assert!(token.starts_with("bb_"));
        assert!(registry.validate_token(&token).is_some());
    }

    #[test]
    fn generate_requires_active_session() {
        let registry = SessionRegistry::new();
        let err = registry.generate_token("ghost", None, None, None);
        assert!(matches!(err, Err(OrchestrationError::AuthNoSession { .. })));
    }

    #[test]
    fn expired_token_is_purged_on_validate() {
        let registry = SessionRegistry::new();
        registry.register_session("u1", test_session());
        let token = registry
            .generate_token("u1", None, Some(Duration::from_millis(0)), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(registry.validate_token(&token).is_none());
    }

    #[test]
    fn remove_session_evicts_tokens() {
        let registry = SessionRegistry::new();
        registry.register_session("u1", test_session());
        let token = registry.generate_token("u1", None, None, None).unwrap();
        registry.remove_session("u1");
        assert!(registry.validate_token(&token).is_none());
    }

    #[test]
    fn non_bb_prefixed_token_is_rejected() {
        let registry = SessionRegistry::new();
        registry.register_session("u1", test_session());
        assert!(registry.validate_token("not-a-token").is_none());
    }
}
