//! Static provider-description contract implemented by every provider crate
//! (`HTTPLLMProviderFactory`/`LLMProviderFactory`) plus the HTTP error-mapping
//! macro they share. Dynamic/wasm plugin loading and hosting (Extism runtime,
//! OCI pull, native dlopen) is not part of this workspace — see DESIGN.md.

use crate::{error::LLMError, LLMProvider};
use futures::future::BoxFuture;

pub mod http;
pub use http::HTTPLLMProviderFactory;

pub type Fut<'a, T> = BoxFuture<'a, T>;

pub trait LLMProviderFactory: Send + Sync {
    fn name(&self) -> &str;
    fn config_schema(&self) -> String;
    // FIXME: refactor
    #[allow(clippy::wrong_self_convention)]
    fn from_config(&self, cfg: &str) -> Result<Box<dyn LLMProvider>, LLMError>;

    fn list_models<'a>(&'a self, cfg: &str) -> Fut<'a, Result<Vec<String>, LLMError>>;

    fn as_http(&self) -> Option<&dyn http::HTTPLLMProviderFactory> {
        None
    }

    /// Whether this provider supports user-managed custom models.
    fn supports_custom_models(&self) -> bool {
        false
    }
}
