//! Change detection for the trend payload.
//!
//! A [`TrendCache`] remembers the content hash of the most recent trend
//! payload together with the logical time it last changed. Pollers compare
//! `last_changed` (or the hash) to skip redraws when a recomputation produced
//! identical data.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Hash of a payload's canonical JSON form: object keys sorted, no whitespace.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized to JSON.
pub fn content_hash<T: Serialize>(payload: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(payload)?);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Result of offering a payload to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendObservation {
    /// Content hash of the offered payload.
    pub hash: String,
    /// When the cached content last changed.
    pub last_changed: DateTime<Utc>,
    /// Whether this payload differed from the cached one.
    pub changed: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    hash: String,
    last_changed: DateTime<Utc>,
}

/// Single-slot memo of the latest trend hash.
///
/// The hash and its timestamp share one lock, so readers never see one
/// updated without the other. Concurrent writers are last-write-wins.
#[derive(Debug, Default)]
pub struct TrendCache {
    slot: Mutex<Option<Slot>>,
}

impl TrendCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `payload` and record it as computed at `logical_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn observe<T: Serialize>(
        &self,
        payload: &T,
        logical_time: DateTime<Utc>,
    ) -> Result<TrendObservation> {
        Ok(self.observe_hash(content_hash(payload)?, logical_time))
    }

    /// Record an already computed hash.
    pub fn observe_hash(&self, hash: String, logical_time: DateTime<Utc>) -> TrendObservation {
        let mut slot = self.slot.lock();
        if let Some(current) = slot.as_ref().filter(|s| s.hash == hash) {
            return TrendObservation {
                last_changed: current.last_changed,
                hash,
                changed: false,
            };
        }

        *slot = Some(Slot {
            hash: hash.clone(),
            last_changed: logical_time,
        });
        TrendObservation {
            hash,
            last_changed: logical_time,
            changed: true,
        }
    }

    /// The cached hash and last-changed time, if anything was observed.
    #[must_use]
    pub fn current(&self) -> Option<(String, DateTime<Utc>)> {
        self.slot
            .lock()
            .as_ref()
            .map(|s| (s.hash.clone(), s.last_changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap()
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = json!({"timestamps": ["t1"], "datasets": [{"label": "x", "values": [1.0]}]});
        let b = json!({"datasets": [{"values": [1.0], "label": "x"}], "timestamps": ["t1"]});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_is_hex_blake3() {
        let hash = content_hash(&json!({})).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, blake3::hash(b"{}").to_hex().to_string());
    }

    #[test]
    fn test_unchanged_payload_keeps_last_changed() {
        let cache = TrendCache::new();
        let payload = json!({"timestamps": ["t1"], "values": [50.0, 50.0]});

        let first = cache.observe(&payload, at(1)).unwrap();
        let second = cache.observe(&payload, at(2)).unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.last_changed, at(1));
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_changed_payload_advances_last_changed() {
        let cache = TrendCache::new();
        let first = cache
            .observe(&json!({"values": [50.0, 50.0]}), at(1))
            .unwrap();
        let second = cache
            .observe(&json!({"values": [40.0, 60.0]}), at(2))
            .unwrap();

        assert!(second.changed);
        assert_eq!(second.last_changed, at(2));
        assert_ne!(first.hash, second.hash);
        assert_eq!(cache.current(), Some((second.hash, at(2))));
    }

    #[test]
    fn test_reverting_payload_counts_as_change() {
        let cache = TrendCache::new();
        cache.observe_hash("a".into(), at(1));
        cache.observe_hash("b".into(), at(2));
        let back = cache.observe_hash("a".into(), at(3));

        assert!(back.changed);
        assert_eq!(back.last_changed, at(3));
    }

    #[test]
    fn test_empty_cache_has_no_current() {
        assert!(TrendCache::new().current().is_none());
    }

    #[test]
    fn test_concurrent_observers_leave_consistent_pair() {
        let cache = Arc::new(TrendCache::new());
        let handles: Vec<_> = (0..8_u32)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.observe_hash(format!("h{i}"), at(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let (hash, last_changed) = cache.current().unwrap();
        let writer: u32 = hash.trim_start_matches('h').parse().unwrap();
        assert_eq!(last_changed, at(writer));
    }
}
