//! Classifies an upstream outcome into the taxonomy used for failover:
//! client-error (never reaches here), upstream-recoverable, upstream-fatal.

use aegis_core::QualityFailure;
use aegis_provider_core::Outcome;

use crate::upstream::{TransportErrorKind, UpstreamTransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Recoverable,
    Fatal,
}

impl FailureClass {
    pub fn into_outcome(self) -> Outcome {
        match self {
            FailureClass::Recoverable => Outcome::RecoverableFailure,
            FailureClass::Fatal => Outcome::FatalFailure,
        }
    }
}

/// HTTP 400/401/403 are fatal; 404 is fatal (every upstream call here
/// targets the model endpoint); 429/5xx are recoverable. Anything else
/// unexpected is treated as recoverable so a single unusual status doesn't
/// permanently sideline a provider.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        400 | 401 | 403 | 404 => FailureClass::Fatal,
        _ => FailureClass::Recoverable,
    }
}

/// Connection-level failures (refused, DNS, TLS, timeouts) are always
/// recoverable: they say nothing about whether the provider's credentials
/// or configuration are valid, only that this attempt didn't land.
pub fn classify_transport_error(_err: &UpstreamTransportError) -> FailureClass {
    FailureClass::Recoverable
}

pub fn transport_kind_label(kind: TransportErrorKind) -> &'static str {
    match kind {
        TransportErrorKind::Connect => "connect",
        TransportErrorKind::Dns => "dns",
        TransportErrorKind::Tls => "tls",
        TransportErrorKind::Timeout => "timeout",
        TransportErrorKind::ReadTimeout => "read_timeout",
        TransportErrorKind::Other => "other",
    }
}

/// Every response-quality failure is recoverable: an SSE error event,
/// a JSON error body, an unterminated stream or an unrecognizable body all
/// mean this particular attempt didn't produce a usable answer, not that the
/// provider itself is misconfigured.
pub fn classify_quality_failure(_failure: QualityFailure) -> FailureClass {
    FailureClass::Recoverable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_not_found_are_fatal() {
        assert_eq!(classify_status(401), FailureClass::Fatal);
        assert_eq!(classify_status(403), FailureClass::Fatal);
        assert_eq!(classify_status(404), FailureClass::Fatal);
        assert_eq!(classify_status(400), FailureClass::Fatal);
    }

    #[test]
    fn server_errors_and_rate_limits_are_recoverable() {
        assert_eq!(classify_status(500), FailureClass::Recoverable);
        assert_eq!(classify_status(502), FailureClass::Recoverable);
        assert_eq!(classify_status(503), FailureClass::Recoverable);
        assert_eq!(classify_status(429), FailureClass::Recoverable);
    }
}
