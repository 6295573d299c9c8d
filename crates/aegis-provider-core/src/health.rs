//! Per-provider health tracking.
//!
//! Modeled on the credential pool's "unavailable until" idiom, collapsed down
//! to a single rolling error count and cooldown timestamp per provider. All
//! operations here are synchronous and O(1); the lock is never held across
//! an upstream call.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RecoverableFailure,
    FatalFailure,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub rolling_error_count: u32,
    pub last_error_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            rolling_error_count: 0,
            last_error_at: None,
            last_success_at: None,
            cooldown_until: None,
        }
    }
}

impl HealthState {
    pub fn is_available(&self, now: Instant) -> bool {
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Tracks every provider's recent failure history and enforces cooldowns.
///
/// A single recoverable failure is recorded but leaves the provider healthy.
/// Once `unhealthy_threshold` recoverable failures land inside a rolling
/// `unhealthy_window`, the provider is marked unhealthy with a `cooldown`
/// timeout; a fatal failure does the same immediately. Any success resets
/// the count and clears the cooldown. Independently, an inline check on
/// every access decays `rolling_error_count` back to 0 once the last error
/// is older than `unhealthy_reset_timeout`.
pub struct HealthTracker {
    cooldown: Duration,
    unhealthy_threshold: u32,
    unhealthy_window: Duration,
    unhealthy_reset_timeout: Duration,
    states: RwLock<HashMap<String, HealthState>>,
}

impl HealthTracker {
    pub fn new(
        cooldown: Duration,
        unhealthy_threshold: u32,
        unhealthy_window: Duration,
        unhealthy_reset_timeout: Duration,
    ) -> Self {
        Self {
            cooldown,
            unhealthy_threshold,
            unhealthy_window,
            unhealthy_reset_timeout,
            states: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self, provider: &str, outcome: Outcome) {
        let now = Instant::now();
        let mut states = self.states.write().expect("health tracker lock poisoned");
        let state = states.entry(provider.to_string()).or_default();
        self.decay_if_stale(state, now);

        match outcome {
            Outcome::Success => {
                if state.cooldown_until.is_some() {
                    info!(provider, "provider recovered, clearing cooldown");
                }
                state.last_success_at = Some(now);
                state.rolling_error_count = 0;
                state.cooldown_until = None;
            }
            Outcome::RecoverableFailure => {
                let outside_window = state
                    .last_error_at
                    .map(|at| now.duration_since(at) > self.unhealthy_window)
                    .unwrap_or(false);
                if outside_window {
                    state.rolling_error_count = 0;
                }
                state.rolling_error_count += 1;
                state.last_error_at = Some(now);
                debug!(provider, count = state.rolling_error_count, "recoverable upstream failure");

                // A single error (or any count still below threshold) leaves the
                // provider healthy; only crossing `unhealthy_threshold` within
                // the window opens a cooldown.
                if state.rolling_error_count >= self.unhealthy_threshold {
                    state.cooldown_until = Some(now + self.cooldown);
                    warn!(provider, cooldown_seconds = self.cooldown.as_secs(), "provider marked unhealthy");
                }
            }
            Outcome::FatalFailure => {
                state.last_error_at = Some(now);
                state.rolling_error_count = state.rolling_error_count.saturating_add(1);
                state.cooldown_until = Some(now + self.cooldown);
                warn!(provider, cooldown_seconds = self.cooldown.as_secs(), "provider marked unhealthy (fatal failure)");
            }
        }
    }

    /// Resets `rolling_error_count` to 0 when the provider's last recorded
    /// error is older than `unhealthy_reset_timeout`. Applied inline on every
    /// access instead of via a separate periodic task.
    fn decay_if_stale(&self, state: &mut HealthState, now: Instant) {
        if let Some(last_error) = state.last_error_at
            && now.duration_since(last_error) > self.unhealthy_reset_timeout
        {
            state.rolling_error_count = 0;
        }
    }

    pub fn is_available(&self, provider: &str) -> bool {
        let now = Instant::now();
        let mut states = self.states.write().expect("health tracker lock poisoned");
        let Some(state) = states.get_mut(provider) else {
            return true;
        };
        self.decay_if_stale(state, now);
        state.is_available(now)
    }

    pub fn snapshot(&self, provider: &str) -> HealthState {
        let now = Instant::now();
        let states = self.states.read().expect("health tracker lock poisoned");
        let mut state = states.get(provider).cloned().unwrap_or_default();
        self.decay_if_stale(&mut state, now);
        state
    }

    pub fn snapshot_all(&self) -> HashMap<String, HealthState> {
        self.states.read().expect("health tracker lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(
            Duration::from_secs(30),
            3,
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
    }

    #[test]
    fn single_recoverable_failure_keeps_provider_healthy() {
        let tracker = tracker();
        tracker.record("p1", Outcome::RecoverableFailure);
        assert!(tracker.is_available("p1"));
        let state = tracker.snapshot("p1");
        assert_eq!(state.rolling_error_count, 1);
    }

    #[test]
    fn success_resets_rolling_error_count() {
        let tracker = tracker();
        tracker.record("p1", Outcome::RecoverableFailure);
        tracker.record("p1", Outcome::RecoverableFailure);
        tracker.record("p1", Outcome::Success);
        let state = tracker.snapshot("p1");
        assert_eq!(state.rolling_error_count, 0);
        assert!(tracker.is_available("p1"));
    }

    #[test]
    fn unknown_provider_is_available_by_default() {
        let tracker = tracker();
        assert!(tracker.is_available("never-seen"));
    }

    #[test]
    fn crossing_threshold_opens_cooldown() {
        let tracker = tracker();
        tracker.record("p1", Outcome::RecoverableFailure);
        assert!(tracker.is_available("p1"));
        tracker.record("p1", Outcome::RecoverableFailure);
        assert!(tracker.is_available("p1"));
        tracker.record("p1", Outcome::RecoverableFailure);
        assert!(!tracker.is_available("p1"));
        let state = tracker.snapshot("p1");
        assert_eq!(state.rolling_error_count, 3);
        state.cooldown_until.expect("should be in cooldown");
    }

    #[test]
    fn stale_error_count_decays_on_access() {
        let tracker = HealthTracker::new(
            Duration::from_secs(30),
            3,
            Duration::from_secs(60),
            Duration::from_millis(10),
        );
        tracker.record("p1", Outcome::RecoverableFailure);
        std::thread::sleep(Duration::from_millis(20));
        let state = tracker.snapshot("p1");
        assert_eq!(state.rolling_error_count, 0);
    }
}
