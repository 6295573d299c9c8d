//! Remembers the last successful provider for a fingerprint for a short
//! window, so a repeat of the same request prefers whatever worked last
//! time regardless of route priority.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::fingerprint::Fingerprint;

struct Entry {
    provider: String,
    expires_at: Instant,
}

pub struct StickyMap {
    window: Duration,
    entries: Mutex<HashMap<Fingerprint, Entry>>,
}

impl StickyMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, fingerprint: Fingerprint, provider: &str) {
        let mut entries = self.entries.lock().expect("sticky map lock poisoned");
        entries.insert(
            fingerprint,
            Entry {
                provider: provider.to_string(),
                expires_at: Instant::now() + self.window,
            },
        );
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        let mut entries = self.entries.lock().expect("sticky map lock poisoned");
        let now = Instant::now();
        match entries.get(fingerprint) {
            Some(entry) if entry.expires_at > now => Some(entry.provider.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remembers_provider_within_window() {
        let sticky = StickyMap::new(Duration::from_secs(60));
        let fp = Fingerprint::of(&json!({"model": "m"}));
        sticky.record_success(fp, "provider-a");
        assert_eq!(sticky.get(&fp), Some("provider-a".to_string()));
    }

    #[test]
    fn expired_entry_is_dropped() {
        let sticky = StickyMap::new(Duration::from_millis(0));
        let fp = Fingerprint::of(&json!({"model": "m"}));
        sticky.record_success(fp, "provider-a");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sticky.get(&fp), None);
    }

    #[test]
    fn unknown_fingerprint_has_no_sticky_provider() {
        let sticky = StickyMap::new(Duration::from_secs(60));
        let fp = Fingerprint::of(&json!({"model": "m"}));
        assert_eq!(sticky.get(&fp), None);
    }
}
