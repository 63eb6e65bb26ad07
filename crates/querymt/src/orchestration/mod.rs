//! The LLM Orchestration Core: interactions, sessions, transport, caching,
//! model registry and auth bootstrap.
//!
//! This module implements the server-side core of an AI coding/writing
//! assistant: it mediates between callers and multiple LLM providers, maintains
//! long-running multi-turn interactions, enforces tool-use protocols, tracks
//! token accounting, and exposes an interface-only persistence sink. Routing,
//! CORS, TLS, CLI parsing, logging transports, and tool implementations
//! themselves are out of scope — collaborators the caller wires in.

pub mod auth_bootstrap;
pub mod cache;
pub mod error;
pub mod interaction;
pub mod message;
pub mod model_registry;
pub mod persistence;
pub mod provider;
pub mod session;
pub mod transport;
pub mod usage;

pub use error::OrchestrationError;
pub use interaction::{Collaboration, Interaction, InteractionCallbacks};
pub use message::{ContentPart, Message, Role, StopReason, ToolUseRecord, ToolValidation};
pub use provider::{ExtendedThinking, MessageRequest, NormalizedResponse, Provider};
pub use session::{ApiToken, SessionRegistry, UserAuthSession, UserContext};
pub use usage::{CacheImpact, DifferentialUsage, TokenUsage, TokenUsageTriple};
