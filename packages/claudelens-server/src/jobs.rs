//! Background job handles (§9 Design Note: "expose as opaque `job_id`
//! values with an explicit state machine; do not expose language-native
//! task or future objects at the boundary").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Backup,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Cooperative cancellation token, checked between documents (ingest,
/// backup) or between rollback units (restore) at the next safe
/// checkpoint (§5 Cancellation & timeouts).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

/// Registry of in-flight and recently completed background jobs, backing
/// the job-status endpoint (§6).
pub struct JobRegistry {
    jobs: DashMap<String, JobRecord>,
    cancel_tokens: DashMap<String, CancelToken>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    /// Creates a new queued job and returns its id and cancel token.
    pub fn create(&self, kind: JobKind, now: DateTime<Utc>) -> (String, CancelToken) {
        let id = Uuid::new_v4().to_string();
        self.jobs.insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                kind,
                state: JobState::Queued,
                created_at: now,
                updated_at: now,
                error_message: None,
            },
        );
        let token = CancelToken::new();
        self.cancel_tokens.insert(id.clone(), token.clone());
        (id, token)
    }

    pub fn transition(&self, job_id: &str, state: JobState, now: DateTime<Utc>) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.state = state;
            entry.updated_at = now;
        }
    }

    pub fn fail(&self, job_id: &str, error_message: String, now: DateTime<Utc>) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.state = JobState::Failed;
            entry.error_message = Some(error_message);
            entry.updated_at = now;
        }
    }

    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|e| e.clone())
    }

    #[must_use]
    pub fn cancel(&self, job_id: &str) -> bool {
        if let Some(token) = self.cancel_tokens.get(job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancel_tokens
            .get(job_id)
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_transition_then_get() {
        let registry = JobRegistry::new();
        let now = Utc::now();
        let (id, _token) = registry.create(JobKind::Ingest, now);
        assert_eq!(registry.get(&id).unwrap().state, JobState::Queued);

        registry.transition(&id, JobState::Running, now);
        assert_eq!(registry.get(&id).unwrap().state, JobState::Running);

        registry.transition(&id, JobState::Completed, now);
        assert_eq!(registry.get(&id).unwrap().state, JobState::Completed);
    }

    #[test]
    fn fail_records_error_message() {
        let registry = JobRegistry::new();
        let (id, _token) = registry.create(JobKind::Backup, Utc::now());
        registry.fail(&id, "disk full".to_string(), Utc::now());
        let job = registry.get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_message.as_deref(), Some("disk full"));
    }

    #[test]
    fn cancel_token_observed_by_job_id() {
        let registry = JobRegistry::new();
        let (id, _token) = registry.create(JobKind::Restore, Utc::now());
        assert!(!registry.is_cancelled(&id));
        assert!(registry.cancel(&id));
        assert!(registry.is_cancelled(&id));
    }
}
