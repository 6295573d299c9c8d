//! Loads the YAML configuration document and turns
//! it into the plain-data types the rest of the workspace operates on:
//! [`aegis_common::Settings`], a list of [`ProviderDescriptor`] and a list of
//! [`RouteEntry`].

use std::path::Path;

use aegis_common::{AuthSettings, Settings};
use aegis_provider_core::provider::{AuthSpec, ProtocolKind, ProviderDescriptor};
use aegis_provider_core::route::RouteEntry;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config document: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("provider `{0}` has auth_type `oauth` but no auth_value reference")]
    MissingOAuthReference(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigAuthType {
    ApiKey,
    Bearer,
    Oauth,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigProtocolKind {
    Anthropic,
    Openai,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfigEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConfigProtocolKind,
    pub base_url: String,
    #[serde(default)]
    pub auth_type: Option<ConfigAuthType>,
    #[serde(default)]
    pub auth_value: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ProviderConfigEntry {
    fn into_descriptor(self) -> Result<ProviderDescriptor, ConfigError> {
        let auth = match (self.auth_type, self.auth_value) {
            (Some(ConfigAuthType::ApiKey), Some(value)) => AuthSpec::ApiKey {
                header: "x-api-key".to_string(),
                value,
            },
            (Some(ConfigAuthType::Bearer), Some(value)) => AuthSpec::Bearer { token: value },
            (Some(ConfigAuthType::Oauth), Some(reference)) => {
                AuthSpec::OAuthManaged { reference }
            }
            (Some(ConfigAuthType::Oauth), None) => {
                return Err(ConfigError::MissingOAuthReference(self.name));
            }
            _ => AuthSpec::None,
        };

        let protocol = match self.kind {
            ConfigProtocolKind::Anthropic => ProtocolKind::Anthropic,
            ConfigProtocolKind::Openai => ProtocolKind::OpenAi,
        };

        Ok(ProviderDescriptor {
            name: self.name,
            protocol,
            base_url: self.base_url,
            auth,
            enabled: self.enabled,
            timeout_seconds: self.timeout_seconds,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfigEntry {
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_model() -> String {
    "passthrough".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub cooldown_seconds: Option<u64>,
    pub unhealthy_threshold: Option<u32>,
    pub unhealthy_window: Option<u64>,
    pub unhealthy_reset_timeout: Option<u64>,
    pub stuck_request_ttl: Option<u64>,
    pub sticky_window_seconds: Option<u64>,
    pub backlog_max_chunks: Option<usize>,
    pub oauth_auto_refresh_enabled: Option<bool>,
    pub auth: Option<ConfigAuthSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigAuthSettings {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub exempt_paths: Option<Vec<String>>,
}

impl ConfigSettings {
    fn into_settings(self) -> Settings {
        let defaults = Settings::default();
        let auth_defaults = AuthSettings::default();
        let auth = self.auth.unwrap_or_default();
        Settings {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            log_level: self.log_level.unwrap_or(defaults.log_level),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            cooldown_seconds: self.cooldown_seconds.unwrap_or(defaults.cooldown_seconds),
            unhealthy_threshold: self.unhealthy_threshold.unwrap_or(defaults.unhealthy_threshold),
            unhealthy_window_seconds: self
                .unhealthy_window
                .unwrap_or(defaults.unhealthy_window_seconds),
            unhealthy_reset_timeout_seconds: self
                .unhealthy_reset_timeout
                .unwrap_or(defaults.unhealthy_reset_timeout_seconds),
            stuck_request_ttl_seconds: self
                .stuck_request_ttl
                .unwrap_or(defaults.stuck_request_ttl_seconds),
            sticky_window_seconds: self
                .sticky_window_seconds
                .unwrap_or(defaults.sticky_window_seconds),
            backlog_max_chunks: self.backlog_max_chunks.unwrap_or(defaults.backlog_max_chunks),
            oauth_auto_refresh_enabled: self
                .oauth_auto_refresh_enabled
                .unwrap_or(defaults.oauth_auto_refresh_enabled),
            auth: AuthSettings {
                enabled: auth.enabled.unwrap_or(auth_defaults.enabled),
                api_key: auth.api_key.or(auth_defaults.api_key),
                exempt_paths: auth.exempt_paths.unwrap_or(auth_defaults.exempt_paths),
            },
        }
    }
}

/// The top-level shape of the configuration document: `settings`,
/// `providers`, `model_routes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub settings: ConfigSettings,
    pub providers: Vec<ProviderConfigEntry>,
    pub model_routes: std::collections::BTreeMap<String, Vec<RouteConfigEntry>>,
}

pub struct LoadedConfig {
    pub settings: Settings,
    pub providers: Vec<ProviderDescriptor>,
    pub routes: Vec<RouteEntry>,
}

impl ConfigDocument {
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_str(&text)
    }

    pub fn into_loaded(self) -> Result<LoadedConfig, ConfigError> {
        let settings = self.settings.into_settings();
        let providers = self
            .providers
            .into_iter()
            .map(ProviderConfigEntry::into_descriptor)
            .collect::<Result<Vec<_>, _>>()?;

        let mut routes = Vec::new();
        for (pattern, entries) in self.model_routes {
            for entry in entries {
                routes.push(RouteEntry {
                    pattern: pattern.clone(),
                    provider: entry.provider,
                    model: entry.model,
                    priority: entry.priority,
                    enabled: entry.enabled,
                });
            }
        }

        Ok(LoadedConfig {
            settings,
            providers,
            routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
settings:
  host: "0.0.0.0"
  port: 9000
  unhealthy_threshold: 2
providers:
  - name: anthropic-direct
    type: anthropic
    base_url: https://api.anthropic.com
    auth_type: api_key
    auth_value: sk-ant-test
  - name: local-openai
    type: openai
    base_url: http://127.0.0.1:11434
    enabled: true
model_routes:
  "claude-*":
    - provider: anthropic-direct
      priority: 0
  "gpt-*":
    - provider: local-openai
      model: gpt-4o-mini
      priority: 0
"#;

    #[test]
    fn parses_sample_document() {
        let doc = ConfigDocument::from_str(SAMPLE).expect("parses");
        let loaded = doc.into_loaded().expect("converts");
        assert_eq!(loaded.settings.port, 9000);
        assert_eq!(loaded.settings.unhealthy_threshold, 2);
        assert_eq!(loaded.providers.len(), 2);
        assert_eq!(loaded.routes.len(), 2);
        assert_eq!(loaded.routes[0].provider, "anthropic-direct");
    }

    #[test]
    fn missing_oauth_reference_is_rejected() {
        let doc = ConfigDocument::from_str(
            r#"
providers:
  - name: broken
    type: anthropic
    base_url: https://api.anthropic.com
    auth_type: oauth
"#,
        )
        .expect("parses");
        assert!(matches!(
            doc.into_loaded(),
            Err(ConfigError::MissingOAuthReference(_))
        ));
    }

    #[test]
    fn defaults_apply_when_settings_omitted() {
        let doc = ConfigDocument::from_str("providers: []\nmodel_routes: {}\n").expect("parses");
        let loaded = doc.into_loaded().expect("converts");
        assert_eq!(loaded.settings.port, Settings::default().port);
    }
}
