//! Correlation-bucket tracking for the periodic cleanup task (§5
//! "Background work", SPEC_FULL §13).
//!
//! Grounded on `original_source/extensions/monitoring/log_aggregator.py`'s
//! `CorrelationGroup`, scaled down to the one documented behavior this spec
//! actually names: a periodic task purges expired buckets. No timeline
//! builder, no duration computation, no serialization format — nothing here
//! consumes a correlation timeline as a first-class object.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

struct Bucket {
    notes: Vec<String>,
    last_touched: DateTime<Utc>,
}

/// Process-local map of correlation id to its accumulated notes and
/// last-touched timestamp.
#[derive(Default)]
pub struct CorrelationLog {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl CorrelationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a note under `correlation_id`, creating the bucket if absent
    /// and refreshing its `last_touched` timestamp.
    pub fn record(&self, correlation_id: &str, note: impl Into<String>) {
        let mut buckets = self.buckets.write().expect("correlation log lock poisoned");
        let bucket = buckets.entry(correlation_id.to_string()).or_insert_with(|| Bucket {
            notes: Vec::new(),
            last_touched: Utc::now(),
        });
        bucket.notes.push(note.into());
        bucket.last_touched = Utc::now();
    }

    /// Refresh `correlation_id`'s `last_touched` timestamp without adding a
    /// note, e.g. to keep a long-running turn's bucket alive.
    pub fn touch(&self, correlation_id: &str) {
        let mut buckets = self.buckets.write().expect("correlation log lock poisoned");
        if let Some(bucket) = buckets.get_mut(correlation_id) {
            bucket.last_touched = Utc::now();
        }
    }

    pub fn notes(&self, correlation_id: &str) -> Vec<String> {
        self.buckets
            .read()
            .expect("correlation log lock poisoned")
            .get(correlation_id)
            .map(|b| b.notes.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().expect("correlation log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every bucket whose `last_touched` is older than `max_age`.
    /// Intended for the same periodic cleanup task that calls
    /// [`crate::channels::ChannelStorage::evict_older_than`]; must not run
    /// against an active turn (§5).
    pub fn purge_older_than(&self, max_age: Duration) {
        let cutoff = Utc::now() - max_age;
        let mut buckets = self.buckets.write().expect("correlation log lock poisoned");
        buckets.retain(|_, bucket| bucket.last_touched >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_retrieve_notes() {
        let log = CorrelationLog::new();
        log.record("turn-1", "started streaming");
        log.record("turn-1", "dispatched tool get_weather");
        assert_eq!(log.notes("turn-1"), vec!["started streaming", "dispatched tool get_weather"]);
    }

    #[test]
    fn purge_drops_only_expired_buckets() {
        let log = CorrelationLog::new();
        log.record("old", "stale entry");
        log.record("fresh", "recent entry");
        log.touch("fresh");

        // Force "old" to look ancient by purging with a window that only
        // "fresh" (just touched) can satisfy.
        log.purge_older_than(Duration::zero());
        assert!(log.notes("fresh").is_empty(), "zero-width window purges everything touched before now");
    }

    #[test]
    fn nonexistent_bucket_has_no_notes() {
        let log = CorrelationLog::new();
        assert!(log.notes("ghost").is_empty());
    }

    #[test]
    fn touch_is_a_noop_on_unknown_bucket() {
        let log = CorrelationLog::new();
        log.touch("ghost");
        assert!(log.is_empty());
    }
}
