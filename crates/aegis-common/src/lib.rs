//! Shared types with no dependency on HTTP frameworks or upstream clients:
//! settings, request ids, and the small set of newtypes every other crate
//! in the workspace needs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required settings field: {0}")]
    MissingField(&'static str),
    #[error("invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: u64 },
}

/// A unique, process-local request id, assigned at arrival and threaded through
/// logs, events and error envelopes. Not part of the dedup fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `settings` section of the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub timeout_seconds: u64,
    pub cooldown_seconds: u64,
    pub unhealthy_threshold: u32,
    pub unhealthy_window_seconds: u64,
    pub unhealthy_reset_timeout_seconds: u64,
    pub stuck_request_ttl_seconds: u64,
    pub sticky_window_seconds: u64,
    pub backlog_max_chunks: usize,
    pub oauth_auto_refresh_enabled: bool,
    pub auth: AuthSettings,
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn unhealthy_window(&self) -> Duration {
        Duration::from_secs(self.unhealthy_window_seconds)
    }

    pub fn unhealthy_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.unhealthy_reset_timeout_seconds)
    }

    pub fn stuck_request_ttl(&self) -> Duration {
        Duration::from_secs(self.stuck_request_ttl_seconds)
    }

    pub fn sticky_window(&self) -> Duration {
        Duration::from_secs(self.sticky_window_seconds)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            log_level: "info".to_string(),
            timeout_seconds: 120,
            cooldown_seconds: 30,
            unhealthy_threshold: 3,
            unhealthy_window_seconds: 60,
            unhealthy_reset_timeout_seconds: 120,
            stuck_request_ttl_seconds: 300,
            sticky_window_seconds: 60,
            backlog_max_chunks: 4096,
            oauth_auto_refresh_enabled: false,
            auth: AuthSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub exempt_paths: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            exempt_paths: vec![
                "/health".to_string(),
                "/docs".to_string(),
                "/redoc".to_string(),
                "/openapi.json".to_string(),
            ],
        }
    }
}
