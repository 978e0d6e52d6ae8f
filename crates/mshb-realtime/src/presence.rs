//! Presence tracking for one topic.
//!
//! Maintains the map of presence keys (user ids) to the metadata each
//! subscription tracked under that key. A key stays present while at least
//! one subscription tracks it, so a user with two windows open only leaves
//! when both are gone.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::hub::SubscriptionId;

/// One tracked presence entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub subscription: SubscriptionId,
    pub meta: Value,
    /// Unix epoch millis of the latest track call.
    pub tracked_at: u64,
}

/// What changed after a track/untrack.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceDiff {
    Joined { key: String, meta: Value },
    Left { key: String },
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    keys: HashMap<String, Vec<PresenceEntry>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track (or re-track with new metadata) `key` for a subscription.
    ///
    /// A subscription tracks at most one key; tracking a different key
    /// first untracks the previous one.
    pub fn on_track(&mut self, subscription: SubscriptionId, key: &str, meta: Value) -> Vec<PresenceDiff> {
        let mut diffs = Vec::new();
        if let Some(previous) = self.key_of(subscription) {
            if previous != key {
                diffs.push(self.on_untrack(subscription));
            }
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let entries = self.keys.entry(key.to_string()).or_default();
        entries.retain(|e| e.subscription != subscription);
        entries.push(PresenceEntry {
            subscription,
            meta: meta.clone(),
            tracked_at: now,
        });

        debug!(key, subscription, "tracking presence");
        diffs.push(PresenceDiff::Joined {
            key: key.to_string(),
            meta,
        });
        diffs
    }

    /// Drop whatever `subscription` tracked.
    pub fn on_untrack(&mut self, subscription: SubscriptionId) -> PresenceDiff {
        let Some(key) = self.key_of(subscription) else {
            return PresenceDiff::Unchanged;
        };

        let now_empty = match self.keys.get_mut(&key) {
            Some(entries) => {
                entries.retain(|e| e.subscription != subscription);
                entries.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.keys.remove(&key);
            debug!(key = %key, "presence key left");
            PresenceDiff::Left { key }
        } else {
            PresenceDiff::Unchanged
        }
    }

    /// Snapshot: key → metadata of every subscription tracking it.
    pub fn state(&self) -> HashMap<String, Vec<Value>> {
        self.keys
            .iter()
            .map(|(k, entries)| (k.clone(), entries.iter().map(|e| e.meta.clone()).collect()))
            .collect()
    }

    pub fn is_present(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn key_of(&self, subscription: SubscriptionId) -> Option<String> {
        self.keys
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| e.subscription == subscription))
            .map(|(k, _)| k.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn track_untrack() {
        let mut tracker = PresenceTracker::new();

        let diffs = tracker.on_track(1, "alice", json!({"status": "online"}));
        assert_eq!(
            diffs,
            vec![PresenceDiff::Joined {
                key: "alice".into(),
                meta: json!({"status": "online"})
            }]
        );
        assert!(tracker.is_present("alice"));

        assert_eq!(
            tracker.on_untrack(1),
            PresenceDiff::Left {
                key: "alice".into()
            }
        );
        assert!(!tracker.is_present("alice"));
        assert_eq!(tracker.on_untrack(1), PresenceDiff::Unchanged);
    }

    #[test]
    fn key_stays_while_any_subscription_tracks_it() {
        let mut tracker = PresenceTracker::new();
        tracker.on_track(1, "alice", json!({"device": "desktop"}));
        tracker.on_track(2, "alice", json!({"device": "laptop"}));

        assert_eq!(tracker.state()["alice"].len(), 2);
        assert_eq!(tracker.on_untrack(1), PresenceDiff::Unchanged);
        assert!(tracker.is_present("alice"));
        assert!(matches!(tracker.on_untrack(2), PresenceDiff::Left { .. }));
    }

    #[test]
    fn retrack_replaces_meta() {
        let mut tracker = PresenceTracker::new();
        tracker.on_track(1, "alice", json!({"status": "online"}));
        tracker.on_track(1, "alice", json!({"status": "idle"}));

        assert_eq!(tracker.state()["alice"], vec![json!({"status": "idle"})]);
        assert_eq!(tracker.key_count(), 1);
    }
}
