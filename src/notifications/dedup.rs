//! Suppression of repeated deliveries that carry no correlation id.
//!
//! Every event reaches the store twice (high-level and raw listener). When
//! the payload has a correlation id the derived notification ids collide and
//! the store drops the copy. Without one each copy gets its own fallback id,
//! so copies are matched on `(event, payload)` within a short window instead.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

#[derive(Debug)]
pub struct DeliveryDeduplicator {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl DeliveryDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Returns `true` if the same event with the same payload was seen less
    /// than one window before `now`. Otherwise records it.
    pub fn is_repeat(&mut self, event: &str, payload: &Value, now: Instant) -> bool {
        let window = self.window;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < window * 10);

        let key = format!("{event}:{payload}");
        if let Some(seen) = self.last_seen.get(&key) {
            if now.saturating_duration_since(*seen) < window {
                return true;
            }
        }
        self.last_seen.insert(key, now);
        false
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}
