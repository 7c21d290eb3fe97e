//! Backup-metadata collection (§3 Backup metadata, §4.7 Flow step 1/5/6).
//!
//! Grounded on [`crate::jobs::JobRegistry`]'s shape: a concurrent map keyed
//! by id, mutated through explicit state-transition methods rather than
//! handed out as a mutable reference.

use std::collections::BTreeMap;

use chrono::Utc;
use claudelens_core::BackupMetadata;
use claudelens_core::BackupStatus;
use dashmap::DashMap;

pub struct BackupMetadataStore {
    by_id: DashMap<String, BackupMetadata>,
}

impl BackupMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
        }
    }

    pub fn insert(&self, metadata: BackupMetadata) {
        self.by_id.insert(metadata.id.clone(), metadata);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<BackupMetadata> {
        self.by_id.get(id).map(|e| e.clone())
    }

    #[must_use]
    pub fn all(&self) -> Vec<BackupMetadata> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }

    /// Transitions a backup to `completed`, recording the final checksum,
    /// byte counts, and content-count summary (§4.7 Flow step 5).
    pub fn complete(
        &self,
        id: &str,
        checksum_sha256: String,
        size_bytes: u64,
        compressed_size_bytes: u64,
        content_counts: BTreeMap<String, u64>,
    ) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = BackupStatus::Completed;
            entry.checksum_sha256 = Some(checksum_sha256);
            entry.size_bytes = size_bytes;
            entry.compressed_size_bytes = compressed_size_bytes;
            entry.content_counts = content_counts;
        }
    }

    /// Transitions a backup to `failed` with an error message (§4.7 Flow
    /// step 6). The partial archive file is left for the caller to decide
    /// whether to retain or delete.
    pub fn fail(&self, id: &str, error_message: String) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = BackupStatus::Failed;
            entry.error_message = Some(error_message);
        }
    }

    pub fn delete(&self, id: &str) -> bool {
        self.by_id.remove(id).is_some()
    }

    #[must_use]
    pub fn touch_deleting(&self, id: &str) -> bool {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = BackupStatus::Deleting;
            true
        } else {
            false
        }
    }
}

impl Default for BackupMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}
