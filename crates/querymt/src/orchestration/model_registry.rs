//! Resolves per-model generation parameters and static capabilities.
//!
//! Grounded on `crate::providers::types` (the models.dev-shaped registry) and the
//! capability-resolution pattern from the agent crate's model-info module: a
//! priority chain over explicit/user/interaction-type/model-capability defaults.

use crate::providers::registry::read_providers_from_cache;
use crate::providers::types::ModelInfo;

/// Conservative fallback when a model has no registry entry.
const DEFAULT_CONTEXT_WINDOW: u64 = 8192;

/// Static capability surface for a model. Missing registry entries yield the
/// conservative defaults documented in §4.6.
#[derive(Debug, Clone)]
pub struct ModelCapabilities {
    pub context_window: u64,
    pub supports_thinking: bool,
    pub supports_tools: bool,
    pub supports_images: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            supports_thinking: false,
            supports_tools: false,
            supports_images: false,
        }
    }
}

/// Per-interaction-type generation defaults (§4.1 parameter resolution, step 3).
#[derive(Debug, Clone, Copy)]
pub struct InteractionTypeDefaults {
    pub temperature: f64,
    pub max_tokens: u64,
    pub thinking: bool,
}

/// Mirrors `Interaction`'s `type` field without depending on `interaction.rs`,
/// so this module can be unit-tested in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Chat,
    Conversation,
    Base,
}

impl InteractionKind {
    pub fn defaults(self) -> InteractionTypeDefaults {
        match self {
            InteractionKind::Chat => InteractionTypeDefaults {
                temperature: 0.7,
                max_tokens: 4096,
                thinking: false,
            },
            InteractionKind::Conversation => InteractionTypeDefaults {
                temperature: 0.2,
                max_tokens: 16384,
                thinking: true,
            },
            InteractionKind::Base => InteractionTypeDefaults {
                temperature: 0.5,
                max_tokens: 8192,
                thinking: false,
            },
        }
    }
}

/// Per-call explicit overrides, the highest-priority source in the resolution chain.
#[derive(Debug, Clone, Default)]
pub struct ExplicitParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub extended_thinking: Option<bool>,
}

/// Per-user provider preferences, second in the resolution chain.
#[derive(Debug, Clone, Default)]
pub struct UserPreferences {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub extended_thinking: Option<bool>,
}

/// The resolved, final generation parameters for a turn.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedParams {
    pub max_tokens: u64,
    pub temperature: f64,
    pub extended_thinking: bool,
    pub thinking_budget_tokens: Option<u64>,
}

/// Looks up capabilities for `provider`/`model` from the locally cached models.dev
/// registry. Conservative defaults are returned if the registry is absent or the
/// model is unknown (capability resolution must never fail a request).
pub fn get_model_capabilities(provider: &str, model: &str) -> ModelCapabilities {
    let Ok(registry) = read_providers_from_cache() else {
        return ModelCapabilities::default();
    };
    let Some(info) = registry.providers.get(provider) else {
        return ModelCapabilities::default();
    };
    let Some(entry) = info.models.get(model) else {
        return ModelCapabilities::default();
    };
    capabilities_from_model_info(entry)
}

fn capabilities_from_model_info(info: &ModelInfo) -> ModelCapabilities {
    ModelCapabilities {
        context_window: info.constraints.context.unwrap_or(DEFAULT_CONTEXT_WINDOW),
        supports_thinking: info.capabilities.reasoning,
        supports_tools: info.capabilities.tool_call,
        supports_images: info.capabilities.modalities.input.iter().any(|m| m == "image"),
    }
}

/// Resolves `(maxTokens, temperature, extendedThinking)` per the priority chain in
/// §4.1: explicit → user preference → interaction-type default → model capability
/// default. When extended thinking ends up enabled, temperature is coerced to 1.
pub fn resolve_params(
    explicit: &ExplicitParams,
    user_prefs: &UserPreferences,
    interaction_type: InteractionKind,
    capabilities: &ModelCapabilities,
) -> ResolvedParams {
    let type_defaults = interaction_type.defaults();

    let extended_thinking = explicit
        .extended_thinking
        .or(user_prefs.extended_thinking)
        .unwrap_or(type_defaults.thinking && capabilities.supports_thinking);

    let max_tokens = explicit
        .max_tokens
        .or(user_prefs.max_tokens)
        .unwrap_or(type_defaults.max_tokens);

    let mut temperature = explicit
        .temperature
        .or(user_prefs.temperature)
        .unwrap_or(type_defaults.temperature);

    if extended_thinking {
        temperature = 1.0;
    }

    ResolvedParams {
        max_tokens,
        temperature,
        extended_thinking,
        thinking_budget_tokens: if extended_thinking {
            Some(max_tokens.min(capabilities.context_window) / 2)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_wins_over_everything() {
        let explicit = ExplicitParams {
            temperature: Some(0.9),
            max_tokens: Some(100),
            extended_thinking: Some(false),
        };
        let resolved = resolve_params(
            &explicit,
            &UserPreferences::default(),
            InteractionKind::Conversation,
            &ModelCapabilities::default(),
        );
        assert_eq!(resolved.max_tokens, 100);
        assert_eq!(resolved.temperature, 0.9);
        assert!(!resolved.extended_thinking);
    }

    #[test]
    fn thinking_coerces_temperature_to_one() {
        let explicit = ExplicitParams {
            extended_thinking: Some(true),
            ..Default::default()
        };
        let caps = ModelCapabilities {
            supports_thinking: true,
            ..Default::default()
        };
        let resolved = resolve_params(
            &explicit,
            &UserPreferences::default(),
            InteractionKind::Chat,
            &caps,
        );
        assert_eq!(resolved.temperature, 1.0);
        assert!(resolved.thinking_budget_tokens.is_some());
    }

    #[test]
    fn falls_back_to_interaction_type_defaults() {
        let resolved = resolve_params(
            &ExplicitParams::default(),
            &UserPreferences::default(),
            InteractionKind::Base,
            &ModelCapabilities::default(),
        );
        assert_eq!(resolved.max_tokens, 8192);
        assert_eq!(resolved.temperature, 0.5);
        assert!(!resolved.extended_thinking);
    }

    #[test]
    fn missing_registry_entry_yields_conservative_defaults() {
        let caps = ModelCapabilities::default();
        assert_eq!(caps.context_window, DEFAULT_CONTEXT_WINDOW);
        assert!(!caps.supports_tools);
        assert!(!caps.supports_images);
    }
}
