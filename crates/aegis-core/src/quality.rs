//! Response-quality validation: the checks a completed upstream response or
//! stream must pass before the broadcaster is allowed to declare
//! `closed-ok` rather than `closed-error`.
//!
//! Order matters. Structural checks (HTTP status, SSE error events, JSON
//! error bodies, body shape) run first; the literal error-phrase heuristic
//! runs last, after the structural checks, so a false-positive substring
//! match can never override a response that is otherwise clearly well
//! formed.

const ERROR_PHRASES: &[&str] = &[
    "500 Internal Server Error",
    "502 Bad Gateway",
    "503 Service Unavailable",
    "504 Gateway Timeout",
    "429 Too Many Requests",
    "401 Unauthorized",
    "403 Forbidden",
];

const COMPLETION_MARKERS: &[&str] = &[
    "event: message_stop",
    "event: content_block_stop",
    "stop_reason",
    "\"type\":\"message_stop\"",
    "finish_reason",
    "data: [DONE]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityFailure {
    HttpErrorStatus,
    SseErrorEvent,
    JsonErrorBody,
    NoRecognizableBody,
    ErrorPhraseDetected,
    MissingCompletionMarker,
}

pub fn validate(status: u16, body: &str) -> Result<(), QualityFailure> {
    if status >= 400 {
        return Err(QualityFailure::HttpErrorStatus);
    }

    let has_sse_data_line = body.lines().any(|line| line.starts_with("data:"));
    let has_sse_error_event = body.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("event: error") || line == "event:error"
    });
    if has_sse_error_event {
        return Err(QualityFailure::SseErrorEvent);
    }

    let parsed_json = if !has_sse_data_line {
        serde_json::from_str::<serde_json::Value>(body.trim()).ok()
    } else {
        None
    };

    if let Some(serde_json::Value::Object(map)) = &parsed_json
        && map.contains_key("error")
    {
        return Err(QualityFailure::JsonErrorBody);
    }

    if !has_sse_data_line && parsed_json.is_none() {
        return Err(QualityFailure::NoRecognizableBody);
    }

    if ERROR_PHRASES.iter().any(|phrase| body.contains(phrase)) {
        return Err(QualityFailure::ErrorPhraseDetected);
    }

    if !COMPLETION_MARKERS.iter().any(|marker| body.contains(marker)) {
        return Err(QualityFailure::MissingCompletionMarker);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_4xx_fails_regardless_of_body() {
        assert_eq!(
            validate(503, "event: message_stop\n\n"),
            Err(QualityFailure::HttpErrorStatus)
        );
    }

    #[test]
    fn sse_error_event_fails() {
        let body = "event: content_block_delta\ndata: {}\n\nevent: error\ndata: {\"type\":\"error\"}\n\n";
        assert_eq!(validate(200, body), Err(QualityFailure::SseErrorEvent));
    }

    #[test]
    fn plain_json_error_body_fails() {
        let body = r#"{"type":"error","error":{"type":"api_error","message":"boom"}}"#;
        assert_eq!(validate(200, body), Err(QualityFailure::JsonErrorBody));
    }

    #[test]
    fn body_without_data_line_or_json_fails() {
        assert_eq!(validate(200, "not json and no sse"), Err(QualityFailure::NoRecognizableBody));
    }

    #[test]
    fn unterminated_stream_fails() {
        let body = "event: message_start\ndata: {}\n\nevent: content_block_delta\ndata: {}\n\n";
        assert_eq!(validate(200, body), Err(QualityFailure::MissingCompletionMarker));
    }

    #[test]
    fn well_formed_sse_stream_passes() {
        let body = "event: message_start\ndata: {}\n\nevent: message_stop\ndata: {}\n\n";
        assert_eq!(validate(200, body), Ok(()));
    }

    #[test]
    fn well_formed_non_streaming_anthropic_response_passes() {
        let body = r#"{"type":"message","role":"assistant","content":[],"stop_reason":"end_turn"}"#;
        assert_eq!(validate(200, body), Ok(()));
    }

    #[test]
    fn well_formed_openai_response_passes() {
        let body = r#"{"id":"1","choices":[{"finish_reason":"stop"}]}"#;
        assert_eq!(validate(200, body), Ok(()));
    }
}
