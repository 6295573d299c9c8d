//! Inbound API key authentication.
//!
//! The proxy accepts a single shared key (configured as `settings.auth.api_key`),
//! presented in `x-api-key` (preferred) or `Authorization: Bearer <token>`.
//! Exempt paths bypass the check entirely.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub authenticated: bool,
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AuthError {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn authenticate(&self, path: &str, headers: &HeaderMap) -> Result<AuthContext, AuthError>;
}

/// Accepts every request without checking credentials. Used when
/// `settings.auth.enabled` is false.
#[derive(Debug, Default)]
pub struct NoopAuth;

impl AuthProvider for NoopAuth {
    fn authenticate(&self, _path: &str, _headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        Ok(AuthContext { authenticated: true })
    }
}

/// A single shared API key, swappable on config reload, with a set of
/// exempt paths that never require the key.
#[derive(Debug)]
pub struct StaticKeyAuth {
    api_key: ArcSwap<Option<String>>,
    exempt_paths: ArcSwap<Vec<String>>,
}

impl StaticKeyAuth {
    pub fn new(api_key: Option<String>, exempt_paths: Vec<String>) -> Self {
        Self {
            api_key: ArcSwap::from_pointee(api_key),
            exempt_paths: ArcSwap::from_pointee(exempt_paths),
        }
    }

    pub fn replace(&self, api_key: Option<String>, exempt_paths: Vec<String>) {
        self.api_key.store(Arc::new(api_key));
        self.exempt_paths.store(Arc::new(exempt_paths));
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.load().iter().any(|exempt| exempt == path)
    }
}

impl AuthProvider for StaticKeyAuth {
    fn authenticate(&self, path: &str, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        if self.is_exempt(path) {
            return Ok(AuthContext { authenticated: false });
        }

        let expected = self.api_key.load();
        let Some(expected) = expected.as_deref() else {
            // No key configured: auth is effectively disabled.
            return Ok(AuthContext { authenticated: true });
        };

        let presented = extract_api_key(headers).ok_or_else(|| {
            AuthError::new(
                StatusCode::UNAUTHORIZED,
                crate::error::unauthenticated_body("missing API key"),
            )
        })?;

        if presented != expected {
            return Err(AuthError::new(
                StatusCode::UNAUTHORIZED,
                crate::error::unauthenticated_body("invalid API key"),
            ));
        }

        Ok(AuthContext { authenticated: true })
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(token) = auth.strip_prefix("bearer ") {
        return Some(token.trim().to_string());
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
