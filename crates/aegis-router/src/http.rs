//! The axum HTTP surface: the single Anthropic-shaped
//! `/v1/messages` and `/v1/messages/count_tokens` endpoints, a health/
//! providers/reload/cleanup admin surface, and a handful of OAuth stubs kept
//! only so a caller hitting them gets a proper Anthropic-shaped error
//! instead of a bare 404.
//!
//! A joiner's requested `stream` flag can differ from the producer's fixed
//! `produced_as_stream` (the dedup fingerprint deliberately ignores
//! `stream`), so this module is also where a buffered producer body is
//! synthesized into an SSE sequence for a stream-requesting caller, and
//! where a streamed producer is accumulated into a single message for a
//! buffered-requesting caller.

use std::convert::Infallible;
use std::sync::Arc;

use aegis_common::RequestId;
use aegis_core::{AuthContext, NextItem, ProxyError, Subscription};
use aegis_protocol::claude::create_message::types::BetaMessage;
use aegis_protocol::claude::error::{ErrorResponse, ErrorType, ErrorTypeKnown};
use aegis_protocol::sse::SseParser;
use aegis_provider_core::provider::ProtocolKind;
use aegis_transform::adapt::{StreamToMessage, streamify_message};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ConfigDocument;
use crate::dispatch::{self, Attached};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/", get(health_summary))
        .route("/health", get(health_summary))
        .route("/providers", get(providers))
        .route("/providers/reload", post(reload))
        .route("/cleanup", post(cleanup))
        .route("/oauth/generate-url", get(oauth_stub))
        .route("/oauth/exchange-code", post(oauth_stub))
        .route("/oauth/status", get(oauth_stub))
        .route("/oauth/refresh/{email}", post(oauth_stub))
        .route("/oauth/tokens", delete(oauth_stub))
        .route("/oauth/tokens/{email}", delete(oauth_stub))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_middleware))
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    match state.auth.load().authenticate(&path, req.headers()) {
        Ok(AuthContext { .. }) => next.run(req).await,
        Err(err) => {
            let mut response = Response::builder()
                .status(err.status)
                .body(Body::from(err.body))
                .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response());
            response.headers_mut().extend(err.headers);
            response
        }
    }
}

async fn messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => return proxy_error_response(ProxyError::bad_request(format!("invalid JSON body: {err}"))),
    };
    let want_stream = value.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let request_id = RequestId::new().to_string();

    match dispatch::dispatch_messages(state, request_id, value).await {
        Ok(attached) => render_attached(attached, want_stream).await,
        Err(err) => proxy_error_response(err),
    }
}

async fn count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => return proxy_error_response(ProxyError::bad_request(format!("invalid JSON body: {err}"))),
    };

    match dispatch::dispatch_count_tokens(state, value).await {
        Ok((status, bytes)) => json_bytes_response(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            bytes,
        ),
        Err(err) => proxy_error_response(err),
    }
}

/// Renders a subscription as the shape its own caller asked for, regardless
/// of which shape the producer actually used upstream.
async fn render_attached(attached: Attached, want_stream: bool) -> Response {
    let Attached {
        subscription,
        produced_as_stream,
        ..
    } = attached;

    match (produced_as_stream, want_stream) {
        (true, true) | (false, false) => render_passthrough(subscription, want_stream).await,
        (false, true) => render_buffered_as_stream(subscription).await,
        (true, false) => render_stream_as_buffered(subscription).await,
    }
}

/// The producer's shape already matches what the caller asked for: forward
/// chunks (or the single buffered body) unchanged.
async fn render_passthrough(subscription: Subscription, as_stream: bool) -> Response {
    if as_stream {
        return sse_response(stream_subscription(subscription));
    }

    loop {
        match subscription.next().await {
            NextItem::Data(chunk) => return json_bytes_response(StatusCode::OK, chunk),
            NextItem::End => return json_bytes_response(StatusCode::OK, Bytes::new()),
            NextItem::Error(body) => return error_response(body),
            NextItem::Cancelled => {
                return proxy_error_response(ProxyError::upstream_unavailable("request cancelled"));
            }
        }
    }
}

/// Producer synthesized a single buffered `BetaMessage`; the caller wants an
/// SSE stream, so replay it through [`streamify_message`].
async fn render_buffered_as_stream(subscription: Subscription) -> Response {
    loop {
        match subscription.next().await {
            NextItem::Data(chunk) => {
                let frames = match serde_json::from_slice::<BetaMessage>(&chunk) {
                    Ok(message) => {
                        let mut out = Vec::new();
                        for event in streamify_message(message) {
                            out.extend_from_slice(&dispatch::encode_event(&event));
                        }
                        Bytes::from(out)
                    }
                    Err(_) => chunk,
                };
                return sse_response(single_frame_stream(frames));
            }
            NextItem::End => return sse_response(single_frame_stream(Bytes::new())),
            NextItem::Error(body) => return error_response(body),
            NextItem::Cancelled => {
                return proxy_error_response(ProxyError::upstream_unavailable("request cancelled"));
            }
        }
    }
}

/// Producer forwarded a live SSE stream; the caller wants a single buffered
/// message, so accumulate every event through [`StreamToMessage`].
async fn render_stream_as_buffered(subscription: Subscription) -> Response {
    let mut parser = SseParser::new();
    let mut accumulator = StreamToMessage::new();

    loop {
        match subscription.next().await {
            NextItem::Data(chunk) => {
                for event in parser.push_bytes(&chunk) {
                    let Ok(parsed) = serde_json::from_str(&event.data) else {
                        continue;
                    };
                    if let Some(message) = accumulator.push_event(parsed) {
                        return json_value_response(StatusCode::OK, &message);
                    }
                }
            }
            NextItem::End => {
                for event in parser.finish() {
                    let Ok(parsed) = serde_json::from_str(&event.data) else {
                        continue;
                    };
                    if let Some(message) = accumulator.push_event(parsed) {
                        return json_value_response(StatusCode::OK, &message);
                    }
                }
                return match accumulator.finalize_on_eof() {
                    Some(message) => json_value_response(StatusCode::OK, &message),
                    None => proxy_error_response(ProxyError::upstream_unavailable(
                        "upstream stream ended before producing a message",
                    )),
                };
            }
            NextItem::Error(body) => return error_response(body),
            NextItem::Cancelled => {
                return proxy_error_response(ProxyError::upstream_unavailable("request cancelled"));
            }
        }
    }
}

/// Drives a subscription to completion as a channel of SSE byte chunks,
/// terminating the channel on `End`/`Error`/`Cancelled` the same way the
/// teacher's `wrap_sse_stream_with_heartbeat` does for its own upstream rx.
fn stream_subscription(subscription: Subscription) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            match subscription.next().await {
                NextItem::Data(chunk) => {
                    if tx.send(chunk).await.is_err() {
                        subscription.close();
                        break;
                    }
                }
                NextItem::End => break,
                NextItem::Error(body) => {
                    let _ = tx.send(error_event_bytes(&body)).await;
                    break;
                }
                NextItem::Cancelled => break,
            }
        }
    });
    rx
}

fn single_frame_stream(frame: Bytes) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = tx.send(frame).await;
    });
    rx
}

fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

fn json_bytes_response(status: StatusCode, body: Bytes) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response())
}

fn json_value_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => json_bytes_response(status, Bytes::from(body)),
        Err(err) => proxy_error_response(ProxyError::internal(format!("failed to encode response: {err}"))),
    }
}

fn proxy_error_response(err: ProxyError) -> Response {
    json_bytes_response(err.status, err.body)
}

/// A [`NextItem::Error`] body is a structured Anthropic error envelope when
/// it came from `Broadcaster::finish_error`, but the raw accumulated
/// response bytes when it came from `finalize_with_validation`'s failure
/// branch. Best-effort parse; fall back to 502 Bad Gateway when it isn't one.
fn error_response(body: Bytes) -> Response {
    let status = status_for_error_body(&body);
    json_bytes_response(status, body)
}

fn error_event_bytes(body: &Bytes) -> Bytes {
    if serde_json::from_slice::<Value>(body).is_ok() {
        let mut frame = Vec::with_capacity(body.len() + 32);
        frame.extend_from_slice(b"event: error\ndata: ");
        frame.extend_from_slice(body);
        frame.extend_from_slice(b"\n\n");
        Bytes::from(frame)
    } else {
        ProxyError::upstream_unavailable(String::from_utf8_lossy(body).into_owned()).to_sse_frame()
    }
}

fn status_for_error_body(body: &[u8]) -> StatusCode {
    let Ok(parsed) = serde_json::from_slice::<ErrorResponse>(body) else {
        return StatusCode::BAD_GATEWAY;
    };
    match parsed.error.r#type {
        ErrorType::Known(ErrorTypeKnown::InvalidRequestError) => StatusCode::BAD_REQUEST,
        ErrorType::Known(ErrorTypeKnown::AuthenticationError) => StatusCode::UNAUTHORIZED,
        ErrorType::Known(ErrorTypeKnown::PermissionError) => StatusCode::FORBIDDEN,
        ErrorType::Known(ErrorTypeKnown::NotFoundError) => StatusCode::NOT_FOUND,
        ErrorType::Known(ErrorTypeKnown::RequestTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorType::Known(ErrorTypeKnown::RateLimitError) => StatusCode::TOO_MANY_REQUESTS,
        ErrorType::Known(ErrorTypeKnown::ApiError) => StatusCode::BAD_GATEWAY,
        ErrorType::Known(ErrorTypeKnown::OverloadedError) => {
            StatusCode::from_u16(529).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
        }
        ErrorType::Custom(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Serialize)]
struct HealthSummary {
    service: &'static str,
    version: &'static str,
    healthy_providers: usize,
    total_providers: usize,
}

async fn health_summary(State(state): State<Arc<AppState>>) -> Json<HealthSummary> {
    let registry = state.registry.load();
    let total = registry.providers().len();
    let healthy = registry
        .providers()
        .iter()
        .filter(|provider| provider.enabled && state.health.is_available(&provider.name))
        .count();

    Json(HealthSummary {
        service: "aegis",
        version: env!("CARGO_PKG_VERSION"),
        healthy_providers: healthy,
        total_providers: total,
    })
}

#[derive(Serialize)]
struct ProviderStatus {
    name: String,
    protocol: &'static str,
    enabled: bool,
    healthy: bool,
    rolling_error_count: u32,
    cooling_down: bool,
    patterns: Vec<String>,
}

async fn providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatus>> {
    let registry = state.registry.load();
    let routes = registry.router().routes();

    let statuses = registry
        .providers()
        .iter()
        .map(|descriptor| {
            let patterns = routes
                .iter()
                .filter(|route| route.provider == descriptor.name)
                .map(|route| route.pattern.clone())
                .collect();
            let snapshot = state.health.snapshot(&descriptor.name);
            ProviderStatus {
                name: descriptor.name.clone(),
                protocol: match descriptor.protocol {
                    ProtocolKind::Anthropic => "anthropic",
                    ProtocolKind::OpenAi => "openai",
                },
                enabled: descriptor.enabled,
                healthy: descriptor.enabled && state.health.is_available(&descriptor.name),
                rolling_error_count: snapshot.rolling_error_count,
                cooling_down: snapshot.cooldown_until.is_some(),
                patterns,
            }
        })
        .collect();

    Json(statuses)
}

async fn reload(State(state): State<Arc<AppState>>) -> Response {
    let Some(config_path) = state.config_path.as_ref() else {
        return proxy_error_response(ProxyError::bad_request(
            "this instance was started without a config file to reload from",
        ));
    };

    let document = match ConfigDocument::from_path(config_path) {
        Ok(document) => document,
        Err(err) => return proxy_error_response(ProxyError::internal(format!("reload failed: {err}"))),
    };
    let loaded = match document.into_loaded() {
        Ok(loaded) => loaded,
        Err(err) => return proxy_error_response(ProxyError::internal(format!("reload failed: {err}"))),
    };

    state.registry.reload(loaded.providers, loaded.routes);
    state.apply_settings(loaded.settings);
    Json(serde_json::json!({"reloaded": true})).into_response()
}

#[derive(Deserialize, Default)]
struct CleanupQuery {
    #[serde(default)]
    force: bool,
}

async fn cleanup(State(state): State<Arc<AppState>>, Query(query): Query<CleanupQuery>) -> Json<Value> {
    let cleaned = state.dedup.cleanup_stuck(query.force).await;
    Json(serde_json::json!({"cleaned": cleaned}))
}

/// Every OAuth administrative route is a thin stub: credential management
/// lives outside this proxy, but a caller hitting one of these paths still
/// gets a proper Anthropic-shaped error rather than a bare 404.
async fn oauth_stub() -> Response {
    proxy_error_response(ProxyError::not_implemented(
        "OAuth account management is not handled by this proxy",
    ))
}
