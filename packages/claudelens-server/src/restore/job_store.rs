//! Restore-job collection (§3 Restore job, §4.8 Progress/state machine).
//!
//! Mirrors [`crate::backup::BackupMetadataStore`]'s shape: a concurrent map
//! keyed by id, mutated only through named transition methods.

use chrono::Utc;
use claudelens_core::{ConflictPolicy, RestoreJob, RestoreMode, RestoreStatus};
use dashmap::DashMap;

pub struct RestoreJobStore {
    by_id: DashMap<String, RestoreJob>,
}

impl RestoreJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self { by_id: DashMap::new() }
    }

    pub fn create(
        &self,
        id: String,
        backup_id: String,
        requester_principal_id: String,
        mode: RestoreMode,
        conflict_policy: ConflictPolicy,
    ) -> RestoreJob {
        let job = RestoreJob {
            id: id.clone(),
            backup_id,
            requester_principal_id,
            mode,
            conflict_policy,
            status: RestoreStatus::Queued,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.by_id.insert(id, job.clone());
        job
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<RestoreJob> {
        self.by_id.get(id).map(|e| e.clone())
    }

    #[must_use]
    pub fn all(&self) -> Vec<RestoreJob> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }

    pub fn mark_validating(&self, id: &str) {
        self.set_status(id, RestoreStatus::Validating);
    }

    pub fn mark_processing(&self, id: &str) {
        self.set_status(id, RestoreStatus::Processing);
    }

    pub fn complete(&self, id: &str) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = RestoreStatus::Completed;
            entry.completed_at = Some(Utc::now());
        }
    }

    pub fn fail(&self, id: &str, error_message: String) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = RestoreStatus::Failed;
            entry.completed_at = Some(Utc::now());
            entry.error_message = Some(error_message);
        }
    }

    /// A cancelled restore still runs its rollback (§5 Cancellation); the
    /// job only reaches this terminal state once rollback has finished.
    pub fn cancel(&self, id: &str) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = RestoreStatus::Cancelled;
            entry.completed_at = Some(Utc::now());
        }
    }

    fn set_status(&self, id: &str, status: RestoreStatus) {
        if let Some(mut entry) = self.by_id.get_mut(id) {
            entry.status = status;
        }
    }
}

impl Default for RestoreJobStore {
    fn default() -> Self {
        Self::new()
    }
}
