//! The Rolling Partition Store (§4.3): month-partitioned messages with lazy
//! partition creation, parallel fan-out reads, and global `uuid` uniqueness.
//!
//! Grounded on the teacher's `StorageEngine` trait (per-key get/put/remove)
//! generalized from a single key-value map to a collection-of-collections
//! keyed by [`PartitionKey`], with a global secondary index enforcing
//! Invariant I2 (`uuid` uniqueness) across the whole store, not just within
//! one partition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

use claudelens_core::{partitions_in_range, CoreError, CoreResult, Message, PartitionKey};

/// One physical month partition: the message documents it holds.
struct Partition {
    messages: DashMap<String, Message>,
}

impl Partition {
    fn new() -> Self {
        Self {
            messages: DashMap::new(),
        }
    }
}

/// Per-partition document count and estimated byte size (the "Storage
/// metrics snapshot" supplemented feature, SPEC_FULL §B).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageMetrics {
    pub partition_counts: BTreeMap<String, u64>,
    pub total_messages: u64,
    pub estimated_bytes: u64,
}

/// The month-partitioned message store.
///
/// `partitions`: the physical collections, created lazily on first write.
/// `indexed`: the advisory "this partition's index set has been created"
/// cache (§4.3) -- a concurrent set with CAS-like semantics via
/// `DashSet::insert`'s boolean return. `uuid_index`: global uuid ->
/// partition lookup, the mechanism that makes Invariant I2 (global
/// uniqueness) and fast single-document lookup possible without scanning
/// every partition.
pub struct MessageStore {
    partitions: DashMap<PartitionKey, Partition>,
    indexed: DashSet<PartitionKey>,
    uuid_index: DashMap<String, PartitionKey>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            indexed: DashSet::new(),
            uuid_index: DashMap::new(),
        }
    }

    /// Lazily creates the partition for `key` if it doesn't exist yet.
    /// Idempotent: a second call is a no-op. Returns whether this call
    /// created it (for metrics/logging only -- callers never need to branch
    /// on it).
    fn ensure_partition(&self, key: PartitionKey) -> bool {
        self.partitions.entry(key).or_insert_with(Partition::new);
        // `insert` returns true the first time; the set only exists to let
        // the scheduler/logging layer know an index "creation" has already
        // been accounted for. Idempotent either way since partition
        // creation itself is idempotent (§4.3).
        self.indexed.insert(key)
    }

    /// Inserts a new message, enforcing global `uuid` uniqueness (I2).
    ///
    /// Returns `Conflict` if the uuid already exists anywhere in the store;
    /// callers (the Ingestion Pipeline) are expected to check existence via
    /// [`MessageStore::contains`] first and treat this as a true race.
    pub fn insert(&self, message: Message) -> CoreResult<()> {
        let key = PartitionKey::of(message.timestamp);
        self.ensure_partition(key);

        let uuid = message.uuid.clone();
        // Atomic claim of the uuid slot via entry API avoids a TOCTOU gap
        // between a `contains` check and the insert.
        let mut conflict = false;
        self.uuid_index.entry(uuid.clone()).or_insert_with(|| {
            key
        });
        if *self.uuid_index.get(&uuid).unwrap() != key {
            conflict = true;
        } else if self
            .partitions
            .get(&key)
            .unwrap()
            .messages
            .contains_key(&uuid)
        {
            conflict = true;
        }

        if conflict {
            return Err(CoreError::Conflict {
                message: format!("uuid {uuid} already exists"),
            });
        }

        self.partitions.get(&key).unwrap().messages.insert(uuid, message);
        Ok(())
    }

    /// Replaces an existing message in place (overwrite-mode ingest, §4.4).
    /// The document is first located via the global index to learn its
    /// partition; moving a document between partitions is unsupported
    /// (timestamps are immutable after write, §4.3 Update).
    pub fn replace(&self, message: Message) -> CoreResult<()> {
        let key = *self
            .uuid_index
            .get(&message.uuid)
            .ok_or(CoreError::NotFound {
                entity: "message",
                id: message.uuid.clone(),
            })?;

        let partition = self.partitions.get(&key).ok_or(CoreError::NotFound {
            entity: "partition",
            id: key.to_string(),
        })?;
        partition.messages.insert(message.uuid.clone(), message);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, uuid: &str) -> bool {
        self.uuid_index.contains_key(uuid)
    }

    /// Single-document lookup. With a timestamp hint, only that partition
    /// is consulted; otherwise partitions are scanned newest-first (§4.3).
    #[must_use]
    pub fn get(&self, uuid: &str, timestamp_hint: Option<DateTime<Utc>>) -> Option<Message> {
        if let Some(ts) = timestamp_hint {
            let key = PartitionKey::of(ts);
            return self
                .partitions
                .get(&key)
                .and_then(|p| p.messages.get(uuid).map(|e| e.clone()));
        }

        if let Some(key) = self.uuid_index.get(uuid) {
            return self
                .partitions
                .get(&key)
                .and_then(|p| p.messages.get(uuid).map(|e| e.clone()));
        }
        None
    }

    /// Fan-out read over `[start, end]` (§4.3 Fan-out read). Dispatches to
    /// every partition that physically intersects the range in parallel
    /// (here: a rayon-free concurrent scan since `DashMap` reads don't
    /// block each other) and merges by re-sorting on timestamp, tie-broken
    /// by `uuid` (§9 "within-session ordering uses message timestamps, ties
    /// broken by uuid").
    pub async fn find_in_range(
        &self,
        session_ids: Option<&[String]>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Message> {
        let candidate_keys = partitions_in_range(start, end);
        let existing: Vec<PartitionKey> = candidate_keys
            .into_iter()
            .filter(|k| self.partitions.contains_key(k))
            .collect();

        let fetches = existing.into_iter().map(|key| async move {
            self.partitions
                .get(&key)
                .map(|p| {
                    p.messages
                        .iter()
                        .map(|e| e.value().clone())
                        .filter(|m| m.timestamp >= start && m.timestamp <= end)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        });

        let mut merged: Vec<Message> = futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .filter(|m| match session_ids {
                Some(ids) => ids.contains(&m.session_id),
                None => true,
            })
            .collect();

        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.uuid.cmp(&b.uuid)));
        merged
    }

    /// Count over `[start, end]`, summed across partitions (§4.3 Fan-out
    /// read, `count`).
    pub async fn count_in_range(
        &self,
        session_ids: Option<&[String]>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> u64 {
        self.find_in_range(session_ids, start, end).await.len() as u64
    }

    pub fn delete(&self, uuid: &str) -> CoreResult<()> {
        let key = self
            .uuid_index
            .remove(uuid)
            .ok_or(CoreError::NotFound {
                entity: "message",
                id: uuid.to_string(),
            })?
            .1;
        if let Some(partition) = self.partitions.get(&key) {
            partition.messages.remove(uuid);
        }
        Ok(())
    }

    /// Drops any partition with zero documents (§4.3 Drop-empty, run by the
    /// Background Scheduler's Partition GC task). Returns the dropped keys.
    pub fn drop_empty_partitions(&self) -> Vec<PartitionKey> {
        let empty: Vec<PartitionKey> = self
            .partitions
            .iter()
            .filter(|e| e.value().messages.is_empty())
            .map(|e| *e.key())
            .collect();
        for key in &empty {
            self.partitions.remove(key);
            self.indexed.remove(key);
        }
        empty
    }

    /// Read-only per-partition count/byte-size snapshot (SPEC_FULL §B
    /// Storage metrics snapshot).
    #[must_use]
    pub fn storage_metrics(&self) -> StorageMetrics {
        let mut partition_counts = BTreeMap::new();
        let mut total_messages = 0u64;
        let mut estimated_bytes = 0u64;

        for entry in &self.partitions {
            let count = entry.value().messages.len() as u64;
            partition_counts.insert(entry.key().collection_name(), count);
            total_messages += count;
            for msg in &entry.value().messages {
                estimated_bytes += estimate_message_bytes(msg.value());
            }
        }

        StorageMetrics {
            partition_counts,
            total_messages,
            estimated_bytes,
        }
    }
}

fn estimate_message_bytes(message: &Message) -> u64 {
    serde_json::to_vec(message).map(|b| b.len() as u64).unwrap_or(0)
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use claudelens_core::{Attribution, ContentPayload, MessageType};

    fn msg(uuid: &str, session_id: &str, ts: DateTime<Utc>) -> Message {
        Message {
            uuid: uuid.to_string(),
            session_id: session_id.to_string(),
            parent_uuid: None,
            message_type: MessageType::User,
            content: ContentPayload::Text("hi".to_string()),
            timestamp: ts,
            content_hash: "h".to_string(),
            attribution: Attribution::default(),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn insert_and_get_round_trips() {
        let store = MessageStore::new();
        store.insert(msg("u1", "s1", ts(2024, 1, 15))).unwrap();
        let fetched = store.get("u1", None).unwrap();
        assert_eq!(fetched.uuid, "u1");
    }

    #[test]
    fn duplicate_uuid_insert_is_conflict() {
        let store = MessageStore::new();
        store.insert(msg("u1", "s1", ts(2024, 1, 15))).unwrap();
        let err = store.insert(msg("u1", "s1", ts(2024, 1, 16))).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn cross_month_messages_land_in_distinct_partitions() {
        let store = MessageStore::new();
        store
            .insert(msg("u1", "s1", Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap()))
            .unwrap();
        store
            .insert(msg("u2", "s1", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 1).unwrap()))
            .unwrap();

        let metrics = store.storage_metrics();
        assert_eq!(metrics.partition_counts.get("messages_2024_01"), Some(&1));
        assert_eq!(metrics.partition_counts.get("messages_2024_02"), Some(&1));
    }

    #[tokio::test]
    async fn find_in_range_spans_boundary_months() {
        let store = MessageStore::new();
        store
            .insert(msg("u1", "s1", Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap()))
            .unwrap();
        store
            .insert(msg("u2", "s1", Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 1).unwrap()))
            .unwrap();

        let results = store
            .find_in_range(
                None,
                Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 2, 1, 23, 59, 59).unwrap(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].uuid, "u1");
        assert_eq!(results[1].uuid, "u2");
    }

    #[test]
    fn replace_updates_in_place_without_moving_partition() {
        let store = MessageStore::new();
        let original = msg("u1", "s1", ts(2024, 3, 1));
        store.insert(original.clone()).unwrap();

        let mut updated = original;
        updated.content = ContentPayload::Text("edited".to_string());
        store.replace(updated).unwrap();

        let fetched = store.get("u1", None).unwrap();
        assert_eq!(fetched.content, ContentPayload::Text("edited".to_string()));
    }

    #[test]
    fn drop_empty_partitions_removes_only_empty_ones() {
        let store = MessageStore::new();
        store.insert(msg("u1", "s1", ts(2024, 3, 1))).unwrap();
        store.delete("u1").unwrap();
        // An empty partition was created as a side effect of insert/delete.
        let dropped = store.drop_empty_partitions();
        assert_eq!(dropped.len(), 1);
    }
}
