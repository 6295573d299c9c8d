//! The dispatch loop: parses and fingerprints an inbound
//! `/v1/messages` request, joins or claims the dedup registry, and, for the
//! originator, walks the router's candidate list issuing upstream calls
//! through the matching protocol adapter until one produces a response that
//! passes quality validation.

use std::sync::Arc;

use aegis_core::{Broadcaster, Fingerprint, ProxyError, Role, Subscription, validate_quality};
use aegis_protocol::claude::create_message::request::{
    CreateMessageHeaders, CreateMessageRequest, CreateMessageRequestBody,
};
use aegis_protocol::claude::create_message::stream::BetaStreamEvent;
use aegis_protocol::claude::create_message::types::BetaMessage;
use aegis_protocol::openai::create_chat_completions::request::CreateChatCompletionRequestBody;
use aegis_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use aegis_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use aegis_protocol::openai::create_chat_completions::types::ChatCompletionStreamOptions;
use aegis_protocol::sse::SseParser;
use aegis_provider_core::provider::{ProtocolKind, ProviderDescriptor};
use aegis_provider_core::route::RouteMatch;
use aegis_provider_core::{Outcome, header_set};
use aegis_transform::adapt::streamify_message;
use aegis_transform::bridge::{OpenAIToClaudeStreamState, transform_request, transform_response};
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::classify::{classify_quality_failure, classify_status, classify_transport_error};
use crate::state::AppState;
use crate::upstream::{UpstreamBody, UpstreamRequest};

/// What the dispatch loop hands back to the HTTP layer: a cursor into the
/// shared broadcaster plus whether the producer is forwarding a live stream
/// or a single buffered body, so the caller knows whether to adapt chunks to
/// the shape it actually asked for.
pub struct Attached {
    pub subscription: Subscription,
    pub produced_as_stream: bool,
    pub fingerprint: Fingerprint,
}

pub async fn dispatch_messages(
    state: Arc<AppState>,
    request_id: String,
    body: Value,
) -> Result<Attached, ProxyError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::bad_request("missing required field `model`"))?
        .to_string();

    if body.get("messages").and_then(Value::as_array).is_none() {
        return Err(ProxyError::bad_request("missing required field `messages`"));
    }

    let want_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let fingerprint = Fingerprint::of(&body);
    let settings = state.settings.load();
    let backlog_max = settings.backlog_max_chunks;
    drop(settings);

    let new_broadcaster = || Broadcaster::new(backlog_max, want_stream);
    let (role, entry) = state
        .dedup
        .claim_or_join(fingerprint, &request_id, new_broadcaster)
        .await;

    let produced_as_stream = entry.broadcaster.produced_as_stream();
    let subscription = entry.broadcaster.attach(role == Role::Originator);

    if role == Role::Originator {
        let state = Arc::clone(&state);
        let broadcaster = Arc::clone(&entry.broadcaster);
        let model = model.clone();
        tokio::spawn(async move {
            run_producer(state, broadcaster, fingerprint, model, body, produced_as_stream).await;
        });
    }

    Ok(Attached {
        subscription,
        produced_as_stream,
        fingerprint,
    })
}

async fn run_producer(
    state: Arc<AppState>,
    broadcaster: Arc<Broadcaster>,
    fingerprint: Fingerprint,
    model: String,
    body: Value,
    produced_as_stream: bool,
) {
    let sticky = state.sticky.get(&fingerprint);
    let registry = state.registry.load();
    let candidates = registry
        .router()
        .ordered_candidates(&model, sticky.as_deref(), |name| state.health.is_available(name));
    drop(registry);

    if candidates.is_empty() {
        broadcaster.finish_error(ProxyError::bad_request(format!("no route matches model `{model}`")).body);
        state.dedup.finalize(&fingerprint).await;
        return;
    }

    let mut last_error = ProxyError::upstream_unavailable("every candidate provider failed");

    // Candidates are already ordered healthy-first, unhealthy-last: every
    // enabled candidate is attempted in that order, so if every provider is
    // unhealthy the last one is still probed rather than the request failing
    // with nothing ever attempted.
    for candidate in &candidates {
        let registry = state.registry.load();
        let Some(descriptor) = registry.get(&candidate.provider).cloned() else {
            continue;
        };
        drop(registry);
        if !descriptor.enabled {
            continue;
        }

        match attempt_candidate(
            &state,
            &broadcaster,
            &descriptor,
            candidate,
            &body,
            produced_as_stream,
        )
        .await
        {
            AttemptResult::Committed => {
                state.sticky.record_success(fingerprint, &descriptor.name);
                state.dedup.finalize(&fingerprint).await;
                return;
            }
            AttemptResult::Failover(err) => {
                last_error = err;
                continue;
            }
        }
    }

    broadcaster.finish_error(last_error.body);
    state.dedup.finalize(&fingerprint).await;
}

enum AttemptResult {
    /// Either the call succeeded, or it failed after bytes were already
    /// forwarded to at least one subscriber. Either way the broadcaster
    /// has reached its terminal state and no further candidate is tried.
    Committed,
    /// Failed with zero bytes forwarded; the caller should try the next
    /// candidate.
    Failover(ProxyError),
}

async fn attempt_candidate(
    state: &Arc<AppState>,
    broadcaster: &Arc<Broadcaster>,
    descriptor: &ProviderDescriptor,
    candidate: &RouteMatch,
    body: &Value,
    produced_as_stream: bool,
) -> AttemptResult {
    let request = match build_upstream_request(descriptor, candidate, body, produced_as_stream) {
        Ok(request) => request,
        Err(err) => {
            state.health.record(&descriptor.name, Outcome::FatalFailure);
            return AttemptResult::Failover(ProxyError::internal(err));
        }
    };

    let response = match state.upstream_client.send(request).await {
        Ok(response) => response,
        Err(err) => {
            let class = classify_transport_error(&err);
            state.health.record(&descriptor.name, class.into_outcome());
            return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
                "{}: {err}",
                descriptor.name
            )));
        }
    };

    let status = response.status;

    if status >= 400 {
        let class = classify_status(status);
        state.health.record(&descriptor.name, class.into_outcome());
        return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
            "{} returned HTTP {status}",
            descriptor.name
        )));
    }

    match response.body {
        UpstreamBody::Buffered(raw) => {
            handle_buffered(state, broadcaster, descriptor, status, raw, produced_as_stream)
        }
        UpstreamBody::Stream(rx) => handle_stream(state, broadcaster, descriptor, status, rx).await,
    }
}

fn handle_buffered(
    state: &Arc<AppState>,
    broadcaster: &Arc<Broadcaster>,
    descriptor: &ProviderDescriptor,
    status: u16,
    raw: Bytes,
    produced_as_stream: bool,
) -> AttemptResult {
    let normalized = match descriptor.protocol {
        ProtocolKind::Anthropic => raw,
        ProtocolKind::OpenAi => match normalize_openai_body(&raw) {
            Ok(body) => body,
            Err(err) => {
                state.health.record(&descriptor.name, Outcome::RecoverableFailure);
                return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
                    "{}: {err}",
                    descriptor.name
                )));
            }
        },
    };

    let text = String::from_utf8_lossy(&normalized);
    // Validate before pushing anything: a buffered response that fails
    // quality validation must leave the broadcaster untouched so the next
    // candidate can still win outright, matching the streaming path where
    // failover stays open until the first byte is actually forwarded.
    if let Err(failure) = validate_quality(status, &text) {
        let class = classify_quality_failure(failure);
        state.health.record(&descriptor.name, class.into_outcome());
        return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
            "{} failed response-quality validation: {failure:?}",
            descriptor.name
        )));
    }
    drop(text);

    let chunk = if produced_as_stream {
        streamified_chunks(&normalized).unwrap_or(normalized)
    } else {
        normalized
    };
    broadcaster.push_chunk(chunk);
    let _ = broadcaster.finalize_with_validation(status);
    state.health.record(&descriptor.name, Outcome::Success);
    AttemptResult::Committed
}

/// Turns a single buffered Anthropic message into the SSE frame sequence a
/// stream-requesting subscriber expects, used when the request that decided
/// the producer's mode asked for `stream: true` but the upstream call itself
/// was buffered (non-streaming OpenAI response).
fn streamified_chunks(body: &Bytes) -> Option<Bytes> {
    let message: BetaMessage = serde_json::from_slice(body).ok()?;
    let events = streamify_message(message);
    let mut out = Vec::new();
    for event in events {
        out.extend_from_slice(&encode_event(&event));
    }
    Some(Bytes::from(out))
}

fn normalize_openai_body(raw: &Bytes) -> Result<Bytes, String> {
    let response: CreateChatCompletionResponse =
        serde_json::from_slice(raw).map_err(|err| format!("unparseable OpenAI response: {err}"))?;
    let claude = transform_response(response);
    serde_json::to_vec(&claude)
        .map(Bytes::from)
        .map_err(|err| format!("failed to re-encode bridged response: {err}"))
}

async fn handle_stream(
    state: &Arc<AppState>,
    broadcaster: &Arc<Broadcaster>,
    descriptor: &ProviderDescriptor,
    status: u16,
    mut rx: tokio::sync::mpsc::Receiver<Result<Bytes, crate::upstream::UpstreamTransportError>>,
) -> AttemptResult {
    let mut pushed_any = false;
    let mut sse = SseParser::new();
    let mut openai_state = OpenAIToClaudeStreamState::new();

    loop {
        tokio::select! {
            biased;
            _ = broadcaster.cancelled() => {
                break;
            }
            item = rx.recv() => {
                match item {
                    Some(Ok(chunk)) => {
                        match descriptor.protocol {
                            ProtocolKind::Anthropic => {
                                broadcaster.push_chunk(chunk);
                                pushed_any = true;
                            }
                            ProtocolKind::OpenAi => {
                                for event in sse.push_bytes(&chunk) {
                                    if event.data.trim() == "[DONE]" {
                                        continue;
                                    }
                                    let Ok(parsed) = serde_json::from_str::<CreateChatCompletionStreamResponse>(&event.data) else {
                                        continue;
                                    };
                                    for claude_event in openai_state.transform_chunk(parsed) {
                                        broadcaster.push_chunk(encode_event(&claude_event));
                                        pushed_any = true;
                                    }
                                }
                            }
                        }
                    }
                    Some(Err(err)) => {
                        if !pushed_any {
                            let class = classify_transport_error(&err);
                            state.health.record(&descriptor.name, class.into_outcome());
                            return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
                                "{}: {err}",
                                descriptor.name
                            )));
                        }
                        warn!(provider = %descriptor.name, error = %err, "upstream stream dropped mid-flight");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    match broadcaster.finalize_with_validation(status) {
        Ok(()) => {
            state.health.record(&descriptor.name, Outcome::Success);
            AttemptResult::Committed
        }
        Err(failure) => {
            if !pushed_any {
                let class = classify_quality_failure(failure);
                state.health.record(&descriptor.name, class.into_outcome());
                return AttemptResult::Failover(ProxyError::upstream_unavailable(format!(
                    "{} failed response-quality validation: {failure:?}",
                    descriptor.name
                )));
            }
            state.health.record(&descriptor.name, Outcome::RecoverableFailure);
            AttemptResult::Committed
        }
    }
}

pub(crate) fn encode_event(event: &BetaStreamEvent) -> Bytes {
    let name = match event {
        BetaStreamEvent::Known(known) => known.event_name(),
        BetaStreamEvent::Unknown(_) => "message",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {name}\ndata: {data}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{UpstreamResponse, UpstreamTransportError};
    use aegis_common::Settings;
    use aegis_provider_core::provider::{AuthSpec, ProviderDescriptor};
    use aegis_provider_core::route::RouteEntry;
    use aegis_provider_core::ProviderRegistry;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{timeout, Duration};

    struct FakeUpstreamClient {
        responses: StdMutex<VecDeque<Result<UpstreamResponse, UpstreamTransportError>>>,
    }

    impl FakeUpstreamClient {
        fn new(responses: Vec<Result<UpstreamResponse, UpstreamTransportError>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::upstream::UpstreamClient for FakeUpstreamClient {
        async fn send(&self, _req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamTransportError> {
            self.responses
                .lock()
                .expect("fake client lock poisoned")
                .pop_front()
                .expect("test exhausted its canned responses")
        }
    }

    fn provider(name: &str) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            protocol: ProtocolKind::Anthropic,
            base_url: format!("https://{name}.example"),
            auth: AuthSpec::None,
            enabled: true,
            timeout_seconds: None,
        }
    }

    fn route(provider: &str, priority: i32) -> RouteEntry {
        RouteEntry {
            pattern: "claude-*".to_string(),
            provider: provider.to_string(),
            model: "passthrough".to_string(),
            priority,
            enabled: true,
        }
    }

    fn test_state(
        providers: Vec<ProviderDescriptor>,
        routes: Vec<RouteEntry>,
        client: FakeUpstreamClient,
    ) -> Arc<AppState> {
        let registry = Arc::new(ProviderRegistry::new(providers, routes));
        AppState::new(Settings::default(), registry, Arc::new(client), None)
    }

    fn anthropic_message_body() -> Bytes {
        Bytes::from(
            serde_json::json!({
                "type": "message",
                "id": "msg_1",
                "role": "assistant",
                "model": "claude-3",
                "content": [{"type": "text", "text": "hi"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 1},
            })
            .to_string(),
        )
    }

    #[tokio::test]
    async fn single_healthy_candidate_commits_on_first_attempt() {
        let client = FakeUpstreamClient::new(vec![Ok(UpstreamResponse {
            status: 200,
            body: UpstreamBody::Buffered(anthropic_message_body()),
        })]);
        let state = test_state(vec![provider("solo")], vec![route("solo", 0)], client);

        let body = serde_json::json!({"model": "claude-3-opus", "messages": [{"role": "user", "content": "hi"}]});
        let attached = dispatch_messages(Arc::clone(&state), "req-1".to_string(), body)
            .await
            .expect("dispatch succeeds");

        assert!(!attached.produced_as_stream);
        match timeout(Duration::from_secs(1), attached.subscription.next())
            .await
            .expect("subscription stalled")
        {
            aegis_core::NextItem::Data(chunk) => assert!(chunk.starts_with(b"{")),
            other => panic!("expected data, got {other:?}"),
        }
        assert!(state.health.is_available("solo"));
    }

    #[tokio::test]
    async fn recoverable_failure_fails_over_to_next_candidate() {
        let client = FakeUpstreamClient::new(vec![
            Ok(UpstreamResponse {
                status: 503,
                body: UpstreamBody::Buffered(Bytes::from_static(b"{\"error\":\"down\"}")),
            }),
            Ok(UpstreamResponse {
                status: 200,
                body: UpstreamBody::Buffered(anthropic_message_body()),
            }),
        ]);
        let state = test_state(
            vec![provider("flaky"), provider("stable")],
            vec![route("flaky", 0), route("stable", 10)],
            client,
        );

        let body = serde_json::json!({"model": "claude-3-opus", "messages": [{"role": "user", "content": "hi"}]});
        let attached = dispatch_messages(Arc::clone(&state), "req-2".to_string(), body)
            .await
            .expect("dispatch succeeds");

        match timeout(Duration::from_secs(1), attached.subscription.next())
            .await
            .expect("subscription stalled")
        {
            aegis_core::NextItem::Data(chunk) => assert!(chunk.starts_with(b"{")),
            other => panic!("expected data, got {other:?}"),
        }
        assert!(state.health.is_available("stable"));
    }

    #[tokio::test]
    async fn exhausting_every_candidate_surfaces_upstream_unavailable() {
        let client = FakeUpstreamClient::new(vec![Ok(UpstreamResponse {
            status: 500,
            body: UpstreamBody::Buffered(Bytes::from_static(b"boom")),
        })]);
        let state = test_state(vec![provider("only")], vec![route("only", 0)], client);

        let body = serde_json::json!({"model": "claude-3-opus", "messages": [{"role": "user", "content": "hi"}]});
        let attached = dispatch_messages(Arc::clone(&state), "req-3".to_string(), body)
            .await
            .expect("dispatch succeeds");

        match timeout(Duration::from_secs(1), attached.subscription.next())
            .await
            .expect("subscription stalled")
        {
            aegis_core::NextItem::Error(body) => {
                let parsed: serde_json::Value = serde_json::from_slice(&body).expect("structured error");
                assert_eq!(parsed["error"]["type"], "api_error");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmatched_model_returns_bad_request_without_touching_upstream() {
        let client = FakeUpstreamClient::new(vec![]);
        let state = test_state(vec![provider("solo")], vec![route("solo", 0)], client);

        let body = serde_json::json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let attached = dispatch_messages(Arc::clone(&state), "req-4".to_string(), body)
            .await
            .expect("dispatch succeeds");

        match timeout(Duration::from_secs(1), attached.subscription.next())
            .await
            .expect("subscription stalled")
        {
            aegis_core::NextItem::Error(body) => {
                let parsed: serde_json::Value = serde_json::from_slice(&body).expect("structured error");
                assert_eq!(parsed["error"]["type"], "invalid_request_error");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_model_field_is_rejected_before_fingerprinting() {
        let client = FakeUpstreamClient::new(vec![]);
        let state = test_state(vec![], vec![], client);

        let body = serde_json::json!({"messages": []});
        let err = dispatch_messages(Arc::clone(&state), "req-5".to_string(), body)
            .await
            .expect_err("missing model is rejected");
        assert_eq!(err.status, http::StatusCode::BAD_REQUEST);
    }
}

/// Asks upstream for a usage chunk at the end of the stream. Without this,
/// `OpenAIToClaudeStreamState::transform_chunk` never sees a usage chunk and
/// so never emits `message_delta`/`message_stop`, leaving the stream without
/// a completion marker.
fn apply_openai_chat_stream_defaults(body: &mut CreateChatCompletionRequestBody) {
    let opts = body
        .stream_options
        .get_or_insert(ChatCompletionStreamOptions::default());
    if opts.include_usage.is_none() {
        opts.include_usage = Some(true);
    }
}

fn build_upstream_request(
    descriptor: &ProviderDescriptor,
    candidate: &RouteMatch,
    body: &Value,
    produced_as_stream: bool,
) -> Result<UpstreamRequest, String> {
    let mut headers = Vec::new();
    header_set(&mut headers, "content-type", "application/json");
    descriptor.auth.apply(&mut headers);

    match descriptor.protocol {
        ProtocolKind::Anthropic => {
            header_set(&mut headers, "anthropic-version", "2023-06-01");
            let mut out = body.clone();
            let Some(map) = out.as_object_mut() else {
                return Err("request body is not a JSON object".to_string());
            };
            map.insert("model".to_string(), Value::String(candidate.upstream_model.clone()));
            map.insert("stream".to_string(), Value::Bool(produced_as_stream));
            let payload = serde_json::to_vec(&out).map_err(|err| err.to_string())?;
            Ok(UpstreamRequest {
                url: format!("{}/v1/messages", descriptor.base_url.trim_end_matches('/')),
                headers,
                body: Bytes::from(payload),
                want_stream: produced_as_stream,
            })
        }
        ProtocolKind::OpenAi => {
            let claude_body: CreateMessageRequestBody =
                serde_json::from_value(body.clone()).map_err(|err| err.to_string())?;
            let request = CreateMessageRequest {
                headers: CreateMessageHeaders::default(),
                body: claude_body,
            };
            let mut openai_request = transform_request(&request);
            openai_request.body.model = candidate.upstream_model.clone();
            openai_request.body.stream = Some(produced_as_stream);
            if produced_as_stream {
                apply_openai_chat_stream_defaults(&mut openai_request.body);
            }
            let payload = serde_json::to_vec(&openai_request.body).map_err(|err| err.to_string())?;
            Ok(UpstreamRequest {
                url: format!(
                    "{}/chat/completions",
                    descriptor.base_url.trim_end_matches('/')
                ),
                headers,
                body: Bytes::from(payload),
                want_stream: produced_as_stream,
            })
        }
    }
}

/// Forwards a `/v1/messages/count_tokens` request unchanged to the first
/// healthy Anthropic-protocol candidate for the requested model; there is no
/// Chat Completions equivalent of this endpoint to bridge against.
pub async fn dispatch_count_tokens(
    state: Arc<AppState>,
    body: Value,
) -> Result<(u16, Bytes), ProxyError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ProxyError::bad_request("missing required field `model`"))?
        .to_string();

    let registry = state.registry.load();
    let sticky = state.sticky.get(&Fingerprint::of(&body));
    let candidates = registry
        .router()
        .ordered_candidates(&model, sticky.as_deref(), |name| state.health.is_available(name));

    for candidate in &candidates {
        let Some(descriptor) = registry.get(&candidate.provider) else {
            continue;
        };
        if !descriptor.enabled || descriptor.protocol != ProtocolKind::Anthropic {
            continue;
        }

        let mut headers = Vec::new();
        header_set(&mut headers, "content-type", "application/json");
        header_set(&mut headers, "anthropic-version", "2023-06-01");
        descriptor.auth.apply(&mut headers);

        let mut out = body.clone();
        if let Some(map) = out.as_object_mut() {
            map.insert("model".to_string(), Value::String(candidate.upstream_model.clone()));
        }
        let payload = match serde_json::to_vec(&out) {
            Ok(payload) => payload,
            Err(err) => return Err(ProxyError::internal(err.to_string())),
        };

        let request = UpstreamRequest {
            url: format!("{}/v1/messages/count_tokens", descriptor.base_url.trim_end_matches('/')),
            headers,
            body: Bytes::from(payload),
            want_stream: false,
        };

        match state.upstream_client.send(request).await {
            Ok(response) => {
                let class = if response.status >= 400 {
                    Some(classify_status(response.status))
                } else {
                    None
                };
                if let Some(class) = class {
                    state.health.record(&descriptor.name, class.into_outcome());
                    continue;
                }
                state.health.record(&descriptor.name, Outcome::Success);
                let body = match response.body {
                    UpstreamBody::Buffered(bytes) => bytes,
                    UpstreamBody::Stream(_) => Bytes::new(),
                };
                return Ok((response.status, body));
            }
            Err(err) => {
                let class = classify_transport_error(&err);
                state.health.record(&descriptor.name, class.into_outcome());
                continue;
            }
        }
    }

    Err(ProxyError::upstream_unavailable(format!(
        "no healthy Anthropic-protocol provider can count tokens for model `{model}`"
    )))
}
