//! Month-partition naming and range enumeration for the message store.
//!
//! A message with timestamp `t` lives in exactly one physical partition,
//! named `messages_YYYY_MM` in UTC (§4.3 Partition naming, Invariant I4).
//! This module provides the deterministic naming function and the range
//! enumeration the Rolling Partition Store uses to compute fan-out
//! targets, grounded on the same calendar-walk the original Python
//! `get_collections_for_range` implements, but typed and allocation-light.

use chrono::{DateTime, Datelike, Duration, Utc};

/// Prefix shared by every message partition name.
pub const PARTITION_PREFIX: &str = "messages";

/// Default fan-out window when a query supplies no explicit time bound.
pub const DEFAULT_WINDOW_DAYS: i64 = 90;

/// Identifies one calendar-month partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
}

impl PartitionKey {
    /// Computes the partition a timestamp belongs to (Invariant I4).
    #[must_use]
    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }

    /// Physical collection name: `messages_YYYY_MM`.
    #[must_use]
    pub fn collection_name(self) -> String {
        format!("{PARTITION_PREFIX}_{:04}_{:02}", self.year, self.month)
    }

    /// Parses a collection name produced by [`PartitionKey::collection_name`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(PARTITION_PREFIX)?.strip_prefix('_')?;
        let (year_str, month_str) = rest.split_once('_')?;
        let year: i32 = year_str.parse().ok()?;
        let month: u32 = month_str.parse().ok()?;
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The partition key for the following calendar month.
    #[must_use]
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.collection_name())
    }
}

/// Computes the ordered sequence of partition keys spanning `[start, end]`
/// inclusive, without consulting what physically exists -- the caller
/// (Rolling Partition Store) filters to partitions that actually exist.
#[must_use]
pub fn partitions_in_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<PartitionKey> {
    if start > end {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let mut current = PartitionKey::of(start);
    let last = PartitionKey::of(end);
    loop {
        keys.push(current);
        if current >= last {
            break;
        }
        current = current.next();
    }
    keys
}

/// Default 90-day lookback window ending now, used when a query carries
/// no explicit time bound.
#[must_use]
pub fn default_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::days(DEFAULT_WINDOW_DAYS), now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn collection_name_format() {
        let key = PartitionKey::of(ts(2024, 1, 31, 23, 59, 59));
        assert_eq!(key.collection_name(), "messages_2024_01");
    }

    #[test]
    fn cross_month_boundary_lands_in_distinct_partitions() {
        let jan = PartitionKey::of(ts(2024, 1, 31, 23, 59, 59));
        let feb = PartitionKey::of(ts(2024, 2, 1, 0, 0, 1));
        assert_ne!(jan, feb);
        assert_eq!(jan.collection_name(), "messages_2024_01");
        assert_eq!(feb.collection_name(), "messages_2024_02");
    }

    #[test]
    fn parse_round_trips_collection_name() {
        let key = PartitionKey {
            year: 2024,
            month: 2,
        };
        assert_eq!(PartitionKey::parse(&key.collection_name()), Some(key));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(PartitionKey::parse("messages_2024_13"), None);
        assert_eq!(PartitionKey::parse("not_a_partition"), None);
    }

    #[test]
    fn next_rolls_over_december() {
        let dec = PartitionKey {
            year: 2024,
            month: 12,
        };
        assert_eq!(
            dec.next(),
            PartitionKey {
                year: 2025,
                month: 1
            }
        );
    }

    #[test]
    fn partitions_in_range_spans_exactly_boundary_months() {
        let start = ts(2024, 1, 31, 23, 59, 59);
        let end = ts(2024, 2, 1, 0, 0, 1);
        let keys = partitions_in_range(start, end);
        assert_eq!(
            keys,
            vec![
                PartitionKey {
                    year: 2024,
                    month: 1
                },
                PartitionKey {
                    year: 2024,
                    month: 2
                },
            ]
        );
    }

    #[test]
    fn partitions_in_range_single_month() {
        let start = ts(2024, 3, 1, 0, 0, 0);
        let end = ts(2024, 3, 31, 23, 59, 59);
        assert_eq!(
            partitions_in_range(start, end),
            vec![PartitionKey {
                year: 2024,
                month: 3
            }]
        );
    }

    #[test]
    fn partitions_in_range_empty_when_inverted() {
        let start = ts(2024, 3, 1, 0, 0, 0);
        let end = ts(2024, 1, 1, 0, 0, 0);
        assert!(partitions_in_range(start, end).is_empty());
    }
}
