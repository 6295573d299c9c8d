//! Fans a single upstream response out to one originator plus zero or more
//! joiners, each consuming at its own pace via an independent cursor.
//!
//! The backlog of chunks seen so far is retained so a subscriber attaching
//! mid-stream can replay everything before switching to live delivery.
//! Producer and subscribers never block each other: the producer appends
//! under a short-held lock and wakes waiters via `Notify`; subscribers read
//! their own cursor position and only wait when they have caught up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::quality::{self, QualityFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Streaming,
    ClosedOk,
    ClosedError,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum NextItem {
    Data(Bytes),
    End,
    Error(Bytes),
    Cancelled,
}

struct CursorHandle {
    position: AtomicUsize,
    disconnected: AtomicBool,
}

struct BroadcastInner {
    backlog: Vec<Bytes>,
    outcome: Outcome,
    error_body: Option<Bytes>,
    bytes_forwarded: bool,
    subscribers: HashMap<u64, Arc<CursorHandle>>,
    next_subscriber_id: u64,
}

/// Per-in-flight-call fan-out object. One instance lives for the lifetime of
/// a single upstream call; it is shared between the producer task reading
/// from upstream and every subscriber (the originator and any joiners).
pub struct Broadcaster {
    inner: Mutex<BroadcastInner>,
    notify: Notify,
    backlog_max_chunks: usize,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
    /// Whether the producer is forwarding a live upstream stream (backlog
    /// chunks are SSE event frames) or synthesized a single buffered body
    /// (the backlog holds exactly one JSON chunk). Fixed at construction by
    /// the originator, which already knows which mode it asked upstream for
    /// before any joiner could possibly attach; read by subscribers whose
    /// requested mode differs from the producer's to decide whether they
    /// need to accumulate or synthesize events.
    produced_as_stream: AtomicBool,
}

impl Broadcaster {
    pub fn new(backlog_max_chunks: usize, produced_as_stream: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BroadcastInner {
                backlog: Vec::new(),
                outcome: Outcome::Streaming,
                error_body: None,
                bytes_forwarded: false,
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
            }),
            notify: Notify::new(),
            backlog_max_chunks,
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            produced_as_stream: AtomicBool::new(produced_as_stream),
        })
    }

    pub fn produced_as_stream(&self) -> bool {
        self.produced_as_stream.load(Ordering::Acquire)
    }

    /// Attaches a new subscriber. Permitted in any state, including after a
    /// terminal outcome: a late attach simply replays the full backlog and
    /// observes the terminal state immediately.
    pub fn attach(self: &Arc<Self>, is_original: bool) -> Subscription {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let cursor = Arc::new(CursorHandle {
            position: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
        });
        inner.subscribers.insert(id, Arc::clone(&cursor));
        Subscription {
            broadcaster: Arc::clone(self),
            cursor,
            id,
            is_original,
        }
    }

    /// Appends a chunk produced by the upstream read loop and wakes any
    /// subscriber waiting past the current backlog. Subscribers that have
    /// fallen further behind than `backlog_max_chunks` are forcibly
    /// disconnected rather than allowed to stall the producer.
    pub fn push_chunk(&self, chunk: Bytes) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        inner.backlog.push(chunk);
        inner.bytes_forwarded = true;
        let len = inner.backlog.len();
        let max = self.backlog_max_chunks;
        inner.subscribers.retain(|id, cursor| {
            if len.saturating_sub(cursor.position.load(Ordering::Acquire)) > max {
                cursor.disconnected.store(true, Ordering::Release);
                warn!(subscriber = *id, backlog_max_chunks = max, "forcibly disconnecting slow subscriber");
                false
            } else {
                true
            }
        });
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn bytes_forwarded(&self) -> bool {
        self.inner.lock().expect("broadcaster lock poisoned").bytes_forwarded
    }

    pub fn outcome(&self) -> Outcome {
        self.inner.lock().expect("broadcaster lock poisoned").outcome
    }

    /// Runs response-quality validation over the full accumulated body (the
    /// concatenation of every chunk pushed so far, in order) and transitions
    /// to `closed-ok` or `closed-error` accordingly.
    pub fn finalize_with_validation(&self, status: u16) -> Result<(), QualityFailure> {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        let mut body = Vec::new();
        for chunk in &inner.backlog {
            body.extend_from_slice(chunk);
        }
        let text = String::from_utf8_lossy(&body);
        let result = quality::validate(status, &text);
        match &result {
            Ok(()) => {
                inner.outcome = Outcome::ClosedOk;
                debug!(status, "broadcaster closed ok");
            }
            Err(failure) => {
                inner.outcome = Outcome::ClosedError;
                inner.error_body = Some(Bytes::from(body));
                warn!(status, ?failure, "broadcaster closed with quality-validation failure");
            }
        }
        drop(inner);
        self.notify.notify_waiters();
        result
    }

    /// Terminates the broadcaster immediately with `closed-error`, used when
    /// the producer fails before accumulating a body worth validating (a
    /// connection error, a non-2xx response with no parseable body, etc).
    pub fn finish_error(&self, body: Bytes) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        inner.outcome = Outcome::ClosedError;
        inner.error_body = Some(body);
        drop(inner);
        debug!("broadcaster closed with a connection-level error");
        self.notify.notify_waiters();
    }

    /// Force-terminates as `cancelled`, used by the stuck-entry sweep and by
    /// the last-subscriber-disconnect policy.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().expect("broadcaster lock poisoned");
        if inner.outcome == Outcome::Streaming {
            inner.outcome = Outcome::Cancelled;
            drop(inner);
            debug!("broadcaster cancelled");
        } else {
            drop(inner);
        }
        self.notify.notify_waiters();
        self.request_cancel();
    }

    /// Best-effort signal to the producer task that it should stop reading
    /// from upstream (e.g. the original disconnected with no joiners left).
    /// Fire-and-forget: the producer is not guaranteed to observe it before
    /// the connection naturally ends.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
        self.cancel_notify.notify_waiters();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Resolves once `request_cancel` has been called, for the producer loop
    /// to `select!` against while reading upstream chunks.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.cancel_notify.notified();
            if self.is_cancel_requested() {
                return;
            }
            notified.await;
        }
    }

    fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("broadcaster lock poisoned").subscribers.len()
    }
}

pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    cursor: Arc<CursorHandle>,
    id: u64,
    is_original: bool,
}

impl Subscription {
    pub async fn next(&self) -> NextItem {
        loop {
            let notified = self.broadcaster.notify.notified();
            {
                let inner = self.broadcaster.inner.lock().expect("broadcaster lock poisoned");
                if self.cursor.disconnected.load(Ordering::Acquire) {
                    return NextItem::Cancelled;
                }

                let idx = self.cursor.position.load(Ordering::Acquire);
                if idx < inner.backlog.len() {
                    let chunk = inner.backlog[idx].clone();
                    drop(inner);
                    self.cursor.position.store(idx + 1, Ordering::Release);
                    return NextItem::Data(chunk);
                }

                match inner.outcome {
                    Outcome::Streaming => {}
                    Outcome::ClosedOk => return NextItem::End,
                    Outcome::ClosedError => {
                        return NextItem::Error(inner.error_body.clone().unwrap_or_default());
                    }
                    Outcome::Cancelled => return NextItem::Cancelled,
                }
            }
            notified.await;
        }
    }

    /// Releases this subscriber. If it was the original and no other
    /// subscribers remain, best-effort requests upstream cancellation.
    pub fn close(&self) {
        self.cursor.disconnected.store(true, Ordering::Release);
        let mut inner = self.broadcaster.inner.lock().expect("broadcaster lock poisoned");
        inner.subscribers.remove(&self.id);
        let remaining = inner.subscribers.len();
        drop(inner);
        if self.is_original && remaining == 0 {
            self.broadcaster.request_cancel();
        }
    }

    pub fn is_original(&self) -> bool {
        self.is_original
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joiner_replays_backlog_then_gets_live_chunks() {
        let broadcaster = Broadcaster::new(4096, true);
        let original = broadcaster.attach(true);
        broadcaster.push_chunk(Bytes::from_static(b"chunk-1"));
        broadcaster.push_chunk(Bytes::from_static(b"chunk-2"));

        let joiner = broadcaster.attach(false);
        match joiner.next().await {
            NextItem::Data(data) => assert_eq!(data, Bytes::from_static(b"chunk-1")),
            other => panic!("expected backlog replay, got {other:?}"),
        }
        match joiner.next().await {
            NextItem::Data(data) => assert_eq!(data, Bytes::from_static(b"chunk-2")),
            other => panic!("expected backlog replay, got {other:?}"),
        }

        broadcaster.push_chunk(Bytes::from_static(b"chunk-3"));
        match joiner.next().await {
            NextItem::Data(data) => assert_eq!(data, Bytes::from_static(b"chunk-3")),
            other => panic!("expected live chunk, got {other:?}"),
        }

        broadcaster.finalize_with_validation(200).ok();
        match original.next().await {
            NextItem::Data(_) => panic!("original already consumed backlog via push"),
            NextItem::Error(_) => {}
            NextItem::End => {}
            NextItem::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn disconnecting_one_subscriber_does_not_affect_another() {
        let broadcaster = Broadcaster::new(4096, true);
        let original = broadcaster.attach(true);
        let joiner = broadcaster.attach(false);
        joiner.close();

        broadcaster.push_chunk(Bytes::from_static(b"hi"));
        match original.next().await {
            NextItem::Data(data) => assert_eq!(data, Bytes::from_static(b"hi")),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn original_disconnect_with_no_joiners_requests_cancel() {
        let broadcaster = Broadcaster::new(4096, true);
        let original = broadcaster.attach(true);
        assert!(!broadcaster.is_cancel_requested());
        original.close();
        assert!(broadcaster.is_cancel_requested());
    }

    #[tokio::test]
    async fn slow_subscriber_beyond_backlog_cap_is_disconnected() {
        let broadcaster = Broadcaster::new(2, true);
        let slow = broadcaster.attach(false);
        broadcaster.push_chunk(Bytes::from_static(b"1"));
        broadcaster.push_chunk(Bytes::from_static(b"2"));
        broadcaster.push_chunk(Bytes::from_static(b"3"));
        broadcaster.push_chunk(Bytes::from_static(b"4"));
        match slow.next().await {
            NextItem::Cancelled => {}
            other => panic!("expected forced disconnect, got {other:?}"),
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn late_attach_after_terminal_replays_full_body() {
        let broadcaster = Broadcaster::new(4096, true);
        broadcaster.push_chunk(Bytes::from_static(b"event: message_stop\ndata: {}\n\n"));
        broadcaster.finalize_with_validation(200).expect("should validate ok");

        let late = broadcaster.attach(false);
        match late.next().await {
            NextItem::Data(data) => assert!(data.starts_with(b"event: message_stop")),
            other => panic!("expected replayed chunk, got {other:?}"),
        }
        match late.next().await {
            NextItem::End => {}
            other => panic!("expected end, got {other:?}"),
        }
    }
}
