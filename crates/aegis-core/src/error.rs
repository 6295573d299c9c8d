//! The client-visible error taxonomy.
//!
//! Every failure surfaced to a caller takes the Anthropic-shaped envelope
//! `{"type":"error","error":{"type":<kind>,"message":<text>}}`, whether it
//! originated from bad input, an upstream failure, or a bug on our side.

use aegis_protocol::claude::error::{ErrorResponse, ErrorTypeKnown};
use bytes::Bytes;
use http::StatusCode;

#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ProxyError {
    fn envelope(status: StatusCode, kind: ErrorTypeKnown, message: impl Into<String>) -> Self {
        let body = serde_json::to_vec(&ErrorResponse::new(kind, message))
            .expect("error envelope always serializes");
        Self {
            status,
            body: Bytes::from(body),
        }
    }

    /// Client-error: malformed request or unsupported field. Never affects
    /// provider health.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::BAD_REQUEST, ErrorTypeKnown::InvalidRequestError, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::UNAUTHORIZED, ErrorTypeKnown::AuthenticationError, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::FORBIDDEN, ErrorTypeKnown::PermissionError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::NOT_FOUND, ErrorTypeKnown::NotFoundError, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::METHOD_NOT_ALLOWED, ErrorTypeKnown::InvalidRequestError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::TOO_MANY_REQUESTS, ErrorTypeKnown::RateLimitError, message)
    }

    /// Upstream-recoverable or upstream-fatal: every candidate provider was
    /// exhausted without success.
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::BAD_GATEWAY, ErrorTypeKnown::ApiError, message)
    }

    /// Internal/bug-class error. Surfaced as 500; does not affect provider
    /// health.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::INTERNAL_SERVER_ERROR, ErrorTypeKnown::ApiError, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::envelope(StatusCode::NOT_IMPLEMENTED, ErrorTypeKnown::ApiError, message)
    }

    /// Renders this error as an Anthropic SSE `event: error` frame, used to
    /// terminate a stream after bytes have already been forwarded.
    pub fn to_sse_frame(&self) -> Bytes {
        let mut frame = Vec::with_capacity(self.body.len() + 16);
        frame.extend_from_slice(b"event: error\ndata: ");
        frame.extend_from_slice(&self.body);
        frame.extend_from_slice(b"\n\n");
        Bytes::from(frame)
    }
}

/// Minimal JSON body for an auth failure before a `ProxyError` (which needs
/// `serde_json`) is constructed inline in `auth.rs`.
pub(crate) fn unauthenticated_body(message: &str) -> Bytes {
    let envelope = ErrorResponse::new(ErrorTypeKnown::AuthenticationError, message);
    Bytes::from(serde_json::to_vec(&envelope).expect("error envelope always serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_has_invalid_request_type_and_400() {
        let err = ProxyError::bad_request("missing model");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&err.body).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[test]
    fn sse_frame_wraps_envelope() {
        let err = ProxyError::upstream_unavailable("all candidates exhausted");
        let frame = err.to_sse_frame();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: error\ndata: "));
        assert!(text.ends_with("\n\n"));
    }
}
