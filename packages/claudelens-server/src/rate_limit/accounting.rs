//! Usage accounting: per-minute in-memory rollups, flushed to durable
//! storage every 60 seconds, re-aggregated on read by interval (§4.6
//! Accounting, Aggregation).
//!
//! Enforcement and accounting are independent paths (§4.6 Independence):
//! nothing in this module ever returns an error a caller must handle --
//! recording is infallible, matching "accounting is best-effort".

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use claudelens_core::{RateLimitAxis, RateLimitRecord};
use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// Aggregation granularity for the read-side rollup (§4.6 Aggregation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    /// Truncates a timestamp to the start of its bucket for this interval.
    #[must_use]
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Minute => ts
                .date_naive()
                .and_hms_opt(ts.hour(), ts.minute(), 0)
                .unwrap()
                .and_utc(),
            Self::Hour => ts.date_naive().and_hms_opt(ts.hour(), 0, 0).unwrap().and_utc(),
            Self::Day => ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
            Self::Week => {
                let days_since_monday = ts.weekday().num_days_from_monday();
                (ts.date_naive() - chrono::Duration::days(days_since_monday as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc()
            }
            Self::Month => ts
                .date_naive()
                .with_day(1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
        }
    }
}

/// The in-memory per-minute rollup for one `(user_id, axis, bucket)` key.
struct LiveRollup {
    requests_made: u64,
    requests_allowed: u64,
    requests_blocked: u64,
    peak_usage_ratio: f64,
    bytes_transferred: u64,
    latency_hist: Histogram<u64>,
}

impl LiveRollup {
    fn new() -> Self {
        Self {
            requests_made: 0,
            requests_allowed: 0,
            requests_blocked: 0,
            peak_usage_ratio: 0.0,
            bytes_transferred: 0,
            // Tracks 1ms..1hr of latency with 3 significant digits, ample
            // for a rate limiter's decision latency.
            latency_hist: Histogram::new_with_bounds(1, 3_600_000, 3).expect("valid histogram bounds"),
        }
    }

    fn record(&mut self, allowed: bool, usage_ratio: f64, bytes: u64, latency_ms: Option<u64>) {
        self.requests_made += 1;
        if allowed {
            self.requests_allowed += 1;
        } else {
            self.requests_blocked += 1;
        }
        self.peak_usage_ratio = self.peak_usage_ratio.max(usage_ratio);
        self.bytes_transferred += bytes;
        if let Some(ms) = latency_ms {
            let _ = self.latency_hist.record(ms.max(1));
        }
    }

    fn to_record(&self, user_id: &str, axis: RateLimitAxis, bucket_start: DateTime<Utc>) -> RateLimitRecord {
        let avg_latency_ms = if self.latency_hist.len() > 0 {
            self.latency_hist.mean()
        } else {
            0.0
        };
        RateLimitRecord {
            user_id: user_id.to_string(),
            axis,
            bucket_start,
            requests_made: self.requests_made,
            requests_allowed: self.requests_allowed,
            requests_blocked: self.requests_blocked,
            peak_usage_ratio: self.peak_usage_ratio,
            avg_latency_ms,
            bytes_transferred: self.bytes_transferred,
        }
    }
}

/// Per-interval aggregation produced for the usage/analytics read path.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntervalAggregate {
    pub bucket_start: DateTime<Utc>,
    pub requests_made: u64,
    pub requests_allowed: u64,
    pub requests_blocked: u64,
    pub peak_usage_ratio: f64,
    pub avg_usage_ratio: f64,
    pub violation_count: u64,
    pub bytes_transferred: u64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
}

/// Durable (for this in-memory crate: process-lifetime) store of flushed
/// minute rollups, plus the live accumulator they're flushed from.
pub struct AccountingStore {
    live: DashMap<(String, RateLimitAxis, DateTime<Utc>), Mutex<LiveRollup>>,
    durable: DashMap<(String, RateLimitAxis), Vec<RateLimitRecord>>,
    retention: Duration,
}

impl AccountingStore {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            live: DashMap::new(),
            durable: DashMap::new(),
            retention,
        }
    }

    /// Records one accepted or denied attempt into the current minute's
    /// live rollup (§4.6 Accounting). Never fails.
    pub fn record(
        &self,
        user_id: &str,
        axis: RateLimitAxis,
        now: DateTime<Utc>,
        allowed: bool,
        usage_ratio: f64,
        bytes: u64,
        latency_ms: Option<u64>,
    ) {
        let bucket = Interval::Minute.bucket_start(now);
        let key = (user_id.to_string(), axis, bucket);
        self.live
            .entry(key)
            .or_insert_with(|| Mutex::new(LiveRollup::new()))
            .lock()
            .record(allowed, usage_ratio, bytes, latency_ms);
    }

    /// Moves every live rollup into durable storage and clears the
    /// in-memory accumulator (§4.6 Accounting: "a background task flushes
    /// rollups to durable storage every 60 seconds").
    pub fn flush(&self) -> usize {
        let keys: Vec<_> = self.live.iter().map(|e| e.key().clone()).collect();
        let mut flushed = 0;
        for key in keys {
            if let Some((_, rollup)) = self.live.remove(&key) {
                let (user_id, axis, bucket_start) = key;
                let record = rollup.lock().to_record(&user_id, axis, bucket_start);
                self.durable.entry((user_id, axis)).or_default().push(record);
                flushed += 1;
            }
        }
        flushed
    }

    /// Drops durable rollups older than the configured retention (§4.6
    /// Accounting: "Rollups age out on a configurable retention").
    pub fn prune_expired(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let mut pruned = 0u64;
        for mut entry in self.durable.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|r| r.bucket_start >= cutoff);
            pruned += (before - entry.value().len()) as u64;
        }
        pruned
    }

    /// Re-aggregates durable rollups for `(user_id, axis)` by `interval`
    /// (§4.6 Aggregation).
    #[must_use]
    pub fn aggregate(&self, user_id: &str, axis: RateLimitAxis, interval: Interval) -> Vec<IntervalAggregate> {
        let Some(records) = self.durable.get(&(user_id.to_string(), axis)) else {
            return Vec::new();
        };

        let mut buckets: BTreeMap<DateTime<Utc>, Vec<&RateLimitRecord>> = BTreeMap::new();
        for record in records.value() {
            buckets
                .entry(interval.bucket_start(record.bucket_start))
                .or_default()
                .push(record);
        }

        buckets
            .into_iter()
            .map(|(bucket_start, recs)| {
                let requests_made: u64 = recs.iter().map(|r| r.requests_made).sum();
                let requests_allowed: u64 = recs.iter().map(|r| r.requests_allowed).sum();
                let requests_blocked: u64 = recs.iter().map(|r| r.requests_blocked).sum();
                let bytes_transferred: u64 = recs.iter().map(|r| r.bytes_transferred).sum();
                let peak_usage_ratio = recs.iter().map(|r| r.peak_usage_ratio).fold(0.0, f64::max);
                let avg_usage_ratio = if recs.is_empty() {
                    0.0
                } else {
                    recs.iter().map(|r| r.peak_usage_ratio).sum::<f64>() / recs.len() as f64
                };
                IntervalAggregate {
                    bucket_start,
                    requests_made,
                    requests_allowed,
                    requests_blocked,
                    peak_usage_ratio,
                    avg_usage_ratio,
                    violation_count: requests_blocked,
                    bytes_transferred,
                    latency_p50_ms: None,
                    latency_p95_ms: None,
                    latency_p99_ms: None,
                }
            })
            .collect()
    }
}
