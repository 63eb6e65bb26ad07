mod queries;
#[cfg(feature = "model-registry")]
mod registry;
mod types;

#[cfg(feature = "model-registry")]
pub use registry::{read_providers_from_cache, update_providers_if_stale};
pub use types::{
    Modalities, ModelCapabilities, ModelConstraints, ModelInfo, ModelPricing, ProviderInfo,
    ProvidersRegistry,
};
