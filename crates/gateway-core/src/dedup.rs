//! Inbound dedup window for adapters whose platform may redeliver the same event (§4.9).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL an entry stays in the seen-map before it's eligible for eviction (§4.9: "≈1 minute").
const DEDUP_TTL: Duration = Duration::from_secs(60);

/// Keyed by an adapter-chosen composite key (e.g. `token + message_id`); insertion scrubs
/// expired entries so the map doesn't grow unbounded under a quiet connection.
#[derive(Default)]
pub struct Deduplicator {
    seen: Mutex<HashMap<String, Instant>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` was already seen within the TTL (duplicate); otherwise records it
    /// and returns `false`.
    pub fn seen_or_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, at| now.duration_since(*at) < DEDUP_TTL);
        if seen.contains_key(key) {
            return true;
        }
        seen.insert(key.to_string(), now);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_of_same_key_is_a_duplicate() {
        let dedup = Deduplicator::new();
        assert!(!dedup.seen_or_insert("tok:msg-1"));
        assert!(dedup.seen_or_insert("tok:msg-1"));
    }

    #[test]
    fn distinct_keys_are_not_duplicates() {
        let dedup = Deduplicator::new();
        assert!(!dedup.seen_or_insert("tok:msg-1"));
        assert!(!dedup.seen_or_insert("tok:msg-2"));
    }
}
