//! The proxy's core engine: request fingerprinting, deduplication, the
//! parallel stream broadcaster, response-quality validation, sticky
//! provider preference and inbound authentication.
//!
//! This crate deliberately does not know how to speak HTTP to a client or
//! construct an upstream call; `aegis-router` wires these pieces together
//! with `aegis-provider-core` and an HTTP client into the actual dispatch
//! loop.

pub mod auth;
pub mod broadcast;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod quality;
pub mod sticky;

pub use auth::{AuthContext, AuthError, AuthProvider, NoopAuth, StaticKeyAuth};
pub use broadcast::{Broadcaster, NextItem, Outcome as BroadcastOutcome, Subscription};
pub use dedup::{DedupRegistry, InFlightEntry, Role};
pub use error::ProxyError;
pub use fingerprint::Fingerprint;
pub use quality::{QualityFailure, validate as validate_quality};
pub use sticky::StickyMap;
