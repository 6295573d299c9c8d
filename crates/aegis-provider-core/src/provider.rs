//! Upstream provider descriptors.
//!
//! A provider is plain data. The dispatch loop (see `aegis-core`) decides how
//! to call it by matching on `ProtocolKind` and building the right request
//! shape, rather than invoking virtual methods on a trait object.

use serde::{Deserialize, Serialize};

use crate::headers::{Headers, header_set};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Anthropic,
    OpenAi,
}

/// How a provider authenticates outbound requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthSpec {
    /// Sends `value` under a named header, e.g. Anthropic's `x-api-key`.
    ApiKey { header: String, value: String },
    /// Sends `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// Token is acquired and refreshed by an external OAuth manager keyed by
    /// `reference` (e.g. an account email); this proxy only stores the
    /// reference and expects the caller to have already attached a live
    /// bearer token before `apply` runs. Acquiring it is out of scope here.
    OAuthManaged { reference: String },
    /// No outbound auth header at all (local or already-authenticated upstreams).
    None,
}

impl Default for AuthSpec {
    fn default() -> Self {
        AuthSpec::None
    }
}

impl AuthSpec {
    pub fn apply(&self, headers: &mut Headers) {
        match self {
            AuthSpec::ApiKey { header, value } => header_set(headers, header.clone(), value.clone()),
            AuthSpec::Bearer { token } => {
                header_set(headers, "authorization", format!("Bearer {token}"))
            }
            AuthSpec::OAuthManaged { .. } => {}
            AuthSpec::None => {}
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub protocol: ProtocolKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl ProviderDescriptor {
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_seconds.map(std::time::Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_auth_sets_header() {
        let auth = AuthSpec::ApiKey {
            header: "x-api-key".to_string(),
            value: "sk-test".to_string(),
        };
        let mut headers = Headers::new();
        auth.apply(&mut headers);
        assert_eq!(
            headers,
            vec![("x-api-key".to_string(), "sk-test".to_string())]
        );
    }

    #[test]
    fn bearer_auth_sets_authorization() {
        let auth = AuthSpec::Bearer {
            token: "tok".to_string(),
        };
        let mut headers = Headers::new();
        auth.apply(&mut headers);
        assert_eq!(
            headers,
            vec![("authorization".to_string(), "Bearer tok".to_string())]
        );
    }
}
