//! Core provider abstractions for the proxy.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Providers and routes are plain data, held behind a lock-free
//! snapshot ([`ProviderRegistry`]) that the dispatch loop in `aegis-core`
//! reads to decide where and how to forward a request.

pub mod errors;
pub mod headers;
pub mod health;
pub mod provider;
pub mod registry;
pub mod route;

pub use errors::{ProviderError, ProviderResult};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use health::{HealthState, HealthTracker, Outcome};
pub use provider::{AuthSpec, ProtocolKind, ProviderDescriptor};
pub use registry::{ProviderRegistry, ProviderRegistrySnapshot};
pub use route::{RouteEntry, RouteMatch, Router};

// Re-export the Claude<->OpenAI bridge and stream/message adapters from aegis-transform
// so callers only need to depend on this crate for the whole provider surface.
pub use aegis_transform::TransformError;
pub use aegis_transform::adapt::{StreamToMessage, streamify_message};
pub use aegis_transform::bridge::{OpenAIToClaudeStreamState, transform_request, transform_response};
