//! Sliding-window usage records backing enforcement (§4.6 Enforcement).
//!
//! One append-only timestamp list per `(user_id, axis)`, grounded on the
//! original `{limit_type}_rate_tracking` collection's
//! `count_documents`/`find_one(sort=timestamp)`/`delete_many` trio, but
//! sharded by axis first so a hot axis for one user never scans another
//! axis's records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use claudelens_core::RateLimitAxis;
use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Default)]
struct UserAxisRecords {
    timestamps: Mutex<Vec<DateTime<Utc>>>,
}

/// The sliding-window usage records for every `(user_id, axis)` pair.
pub struct UsageRecordStore {
    records: DashMap<(String, RateLimitAxis), UserAxisRecords>,
}

impl UsageRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Count of records with `timestamp >= now - window` (§4.6 step 2).
    #[must_use]
    pub fn count_since(&self, user_id: &str, axis: RateLimitAxis, since: DateTime<Utc>) -> u64 {
        self.records
            .get(&(user_id.to_string(), axis))
            .map(|entry| entry.timestamps.lock().iter().filter(|t| **t >= since).count() as u64)
            .unwrap_or(0)
    }

    /// Earliest in-window timestamp, used to compute `Retry-After` (§4.6
    /// step 3: "time until the oldest in-window record expires").
    #[must_use]
    pub fn oldest_since(&self, user_id: &str, axis: RateLimitAxis, since: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.records
            .get(&(user_id.to_string(), axis))
            .and_then(|entry| entry.timestamps.lock().iter().filter(|t| **t >= since).min().copied())
    }

    /// Appends a new record and lazily prunes anything that fell out of the
    /// window, amortizing the original service's separate `delete_many`
    /// call into the same write path.
    pub fn record(&self, user_id: &str, axis: RateLimitAxis, now: DateTime<Utc>, window: Duration) {
        let entry = self
            .records
            .entry((user_id.to_string(), axis))
            .or_default();
        let mut timestamps = entry.timestamps.lock();
        timestamps.push(now);
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        timestamps.retain(|t| *t >= cutoff);
    }

    /// Retry-After (seconds) until the oldest in-window record expires.
    #[must_use]
    pub fn retry_after_secs(&self, user_id: &str, axis: RateLimitAxis, now: DateTime<Utc>, window: Duration) -> u64 {
        let since = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        match self.oldest_since(user_id, axis, since) {
            Some(oldest) => {
                let expires_at = oldest + chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
                (expires_at - now).num_seconds().max(0) as u64
            }
            None => 0,
        }
    }
}

impl Default for UsageRecordStore {
    fn default() -> Self {
        Self::new()
    }
}
