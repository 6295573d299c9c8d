//! The HTTP client used to actually call an upstream provider.
//!
//! Mirrors the teacher's `wreq`-based client: a thin trait so the dispatch
//! loop never names `wreq` directly, one long-lived client per outbound
//! proxy setting, and classification of transport failures into the
//! recoverable/fatal taxonomy used by health tracking and failover.

use std::time::Duration;

use aegis_provider_core::Headers;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Dns,
    Tls,
    Timeout,
    ReadTimeout,
    Other,
}

#[derive(Debug, Clone)]
pub struct UpstreamTransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl std::fmt::Display for UpstreamTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for UpstreamTransportError {}

pub struct UpstreamRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Bytes,
    /// Whether the caller wants the response streamed chunk-by-chunk
    /// (`true`) or fully buffered before being returned (`false`).
    pub want_stream: bool,
}

/// A response body, produced either in one piece or as a channel of chunks.
/// The channel carries `Err` once if the connection drops mid-stream, after
/// which the channel closes.
pub enum UpstreamBody {
    Buffered(Bytes),
    Stream(mpsc::Receiver<Result<Bytes, UpstreamTransportError>>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamTransportError>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// `wreq`-backed implementation. One client instance is shared across every
/// call; `wreq::Client` already pools connections internally.
pub struct WreqUpstreamClient {
    client: wreq::Client,
    read_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let client = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            read_timeout: config.read_timeout,
        })
    }
}

#[async_trait]
impl UpstreamClient for WreqUpstreamClient {
    async fn send(&self, req: UpstreamRequest) -> Result<UpstreamResponse, UpstreamTransportError> {
        let mut builder = self.client.post(&req.url).body(req.body);
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(map_wreq_error)?;
        let status = response.status().as_u16();

        if !req.want_stream || status >= 400 {
            let body = response.bytes().await.map_err(map_wreq_error)?;
            return Ok(UpstreamResponse {
                status,
                body: UpstreamBody::Buffered(body),
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let read_timeout = self.read_timeout;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(read_timeout, stream.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        let _ = tx
                            .send(Err(UpstreamTransportError {
                                kind: TransportErrorKind::ReadTimeout,
                                message: "timed out waiting for next chunk".to_string(),
                            }))
                            .await;
                        break;
                    }
                };
                let Some(item) = item else { break };
                match item {
                    Ok(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(map_wreq_error(err))).await;
                        break;
                    }
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn map_wreq_error(err: wreq::Error) -> UpstreamTransportError {
    UpstreamTransportError {
        kind: classify_wreq_error(&err),
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        return if message.contains("read") || message.contains("idle") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        };
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("ssl") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if message.contains("tls") || message.contains("ssl") {
        return TransportErrorKind::Tls;
    }
    TransportErrorKind::Other
}
