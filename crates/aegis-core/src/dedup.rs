//! Fingerprint -> in-flight request handle. Exactly one concurrent arrival
//! for a given fingerprint becomes the originator; every other concurrent
//! arrival joins its broadcaster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broadcast::Broadcaster;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Originator,
    Joiner,
}

pub struct InFlightEntry {
    pub broadcaster: Arc<Broadcaster>,
    pub arrived_at: Instant,
    pub originator_request_id: String,
}

/// Process-wide map from fingerprint to in-flight entry. The lock is held
/// only long enough to check/insert a map entry; it is never held across
/// upstream I/O.
pub struct DedupRegistry {
    entries: Mutex<HashMap<Fingerprint, Arc<InFlightEntry>>>,
    stuck_ttl: Duration,
    /// Test-only hook: delays the return to the caller after a successful
    /// claim, to reliably widen the window in which joiners arrive.
    claim_delay: Option<Duration>,
}

impl DedupRegistry {
    pub fn new(stuck_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stuck_ttl,
            claim_delay: None,
        }
    }

    pub fn with_claim_delay(mut self, delay: Duration) -> Self {
        self.claim_delay = Some(delay);
        self
    }

    /// Either becomes the originator for `fingerprint` (calling
    /// `new_broadcaster` to create its broadcaster) or joins whatever
    /// broadcaster the current originator already created.
    pub async fn claim_or_join(
        &self,
        fingerprint: Fingerprint,
        request_id: &str,
        new_broadcaster: impl FnOnce() -> Arc<Broadcaster>,
    ) -> (Role, Arc<InFlightEntry>) {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&fingerprint) {
            debug!(%fingerprint, request_id, originator = %existing.originator_request_id, "joining in-flight request");
            return (Role::Joiner, Arc::clone(existing));
        }

        let entry = Arc::new(InFlightEntry {
            broadcaster: new_broadcaster(),
            arrived_at: Instant::now(),
            originator_request_id: request_id.to_string(),
        });
        entries.insert(fingerprint, Arc::clone(&entry));
        drop(entries);
        debug!(%fingerprint, request_id, "claimed as originator");

        if let Some(delay) = self.claim_delay {
            tokio::time::sleep(delay).await;
        }

        (Role::Originator, entry)
    }

    /// Called by the originator once its broadcaster reaches a terminal
    /// state. Removing the map entry only stops *new* arrivals from joining;
    /// any joiner already holding a clone of the broadcaster keeps draining
    /// it independently until it is dropped.
    pub async fn finalize(&self, fingerprint: &Fingerprint) {
        self.entries.lock().await.remove(fingerprint);
    }

    /// Sweeps entries whose arrival predates `stuck_ttl`, cancelling their
    /// broadcasters. With `force`, every current entry is swept regardless
    /// of age. Returns the number of entries removed.
    pub async fn cleanup_stuck(&self, force: bool) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let stale: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| force || now.duration_since(entry.arrived_at) >= self.stuck_ttl)
            .map(|(fp, _)| *fp)
            .collect();

        for fp in &stale {
            if let Some(entry) = entries.remove(fp) {
                entry.broadcaster.cancel();
            }
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), force, "cleaned up stuck in-flight entries");
        }
        stale.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn first_arrival_is_originator_second_is_joiner() {
        let registry = DedupRegistry::new(Duration::from_secs(300));
        let fp = Fingerprint::of(&json!({"model": "m"}));

        let (role_a, entry_a) = registry
            .claim_or_join(fp, "req-a", || Broadcaster::new(16, true))
            .await;
        assert_eq!(role_a, Role::Originator);

        let (role_b, entry_b) = registry
            .claim_or_join(fp, "req-b", || Broadcaster::new(16, true))
            .await;
        assert_eq!(role_b, Role::Joiner);
        assert!(Arc::ptr_eq(&entry_a.broadcaster, &entry_b.broadcaster));
    }

    #[tokio::test]
    async fn finalize_lets_next_arrival_become_a_fresh_originator() {
        let registry = DedupRegistry::new(Duration::from_secs(300));
        let fp = Fingerprint::of(&json!({"model": "m"}));

        registry.claim_or_join(fp, "req-a", || Broadcaster::new(16, true)).await;
        registry.finalize(&fp).await;

        let (role, _) = registry.claim_or_join(fp, "req-c", || Broadcaster::new(16, true)).await;
        assert_eq!(role, Role::Originator);
    }

    #[tokio::test]
    async fn cleanup_stuck_removes_old_entries_and_cancels_broadcaster() {
        let registry = DedupRegistry::new(Duration::from_millis(0));
        let fp = Fingerprint::of(&json!({"model": "m"}));
        let (_, entry) = registry.claim_or_join(fp, "req-a", || Broadcaster::new(16, true)).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = registry.cleanup_stuck(false).await;
        assert_eq!(removed, 1);
        assert_eq!(entry.broadcaster.outcome(), crate::broadcast::Outcome::Cancelled);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn force_cleanup_sweeps_fresh_entries_too() {
        let registry = DedupRegistry::new(Duration::from_secs(300));
        let fp = Fingerprint::of(&json!({"model": "m"}));
        registry.claim_or_join(fp, "req-a", || Broadcaster::new(16, true)).await;

        let removed = registry.cleanup_stuck(true).await;
        assert_eq!(removed, 1);
    }
}
