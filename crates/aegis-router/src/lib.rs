//! Wires the provider registry, dedup/broadcast machinery from `aegis-core`
//! and the protocol bridge from `aegis-transform` into a runnable HTTP
//! surface: config loading, the upstream client, the dispatch loop, and the
//! axum router itself.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod state;
pub mod upstream;

pub use config::{ConfigDocument, ConfigError, LoadedConfig};
pub use dispatch::{dispatch_count_tokens, dispatch_messages, Attached};
pub use http::router;
pub use state::AppState;
pub use upstream::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
