//! One-time ownership backfill (SPEC_FULL §B Hierarchical ownership
//! migration shape): a fresh store never needs this, since sessions and
//! messages never carry `owner_id` in the first place (§9 Design Note).
//! Kept as a reference operation for a store seeded from a legacy export
//! that still carries a denormalized `owner_id` field per session -- it
//! strips that field and re-derives ownership transitively through the
//! session's `project_id`, the same path [`crate::ownership::OwnershipResolver`]
//! uses for every other read.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::storage::{ProjectStore, SessionStore};

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MigrationReport {
    pub sessions_seen: u64,
    pub sessions_migrated: u64,
    /// Sessions whose legacy `owner_id` did not match any project the
    /// session's `project_id` resolves to -- not written, and surfaced
    /// here rather than silently dropped or silently trusted.
    pub sessions_orphaned: Vec<String>,
}

/// Reads legacy session documents (each expected to carry at least
/// `session_id`, `project_id`, and optionally a legacy `owner_id`),
/// verifies `project_id` resolves to a project already present in
/// `projects`, and materializes the session into `sessions` via
/// [`SessionStore::restore_put`] -- the same entry point the Restore
/// Engine uses for direct writes. The legacy `owner_id` field is read only
/// to cross-check against the project's actual owner; it is never stored.
pub fn backfill_ownership(projects: &ProjectStore, sessions: &SessionStore, legacy_sessions: &[Value]) -> MigrationReport {
    let mut report = MigrationReport::default();

    for doc in legacy_sessions {
        report.sessions_seen += 1;
        let Some(session_id) = doc.get("session_id").and_then(Value::as_str) else {
            warn!("legacy session document missing session_id, skipping");
            continue;
        };
        let Some(project_id) = doc.get("project_id").and_then(Value::as_str) else {
            report.sessions_orphaned.push(session_id.to_string());
            continue;
        };

        let Some(project) = projects.get(project_id) else {
            report.sessions_orphaned.push(session_id.to_string());
            continue;
        };

        if let Some(legacy_owner) = doc.get("owner_id").and_then(Value::as_str) {
            if legacy_owner != project.owner_id {
                warn!(
                    session_id,
                    legacy_owner,
                    project_owner = %project.owner_id,
                    "legacy owner_id disagrees with the project's actual owner; trusting the project"
                );
            }
        }

        let mut session = match serde_json::from_value::<claudelens_core::Session>(doc.clone()) {
            Ok(session) => session,
            Err(err) => {
                warn!(session_id, error = %err, "legacy session document does not match the current schema, skipping");
                report.sessions_orphaned.push(session_id.to_string());
                continue;
            }
        };
        session.project_id = project.id.clone();
        sessions.restore_put(session);
        report.sessions_migrated += 1;
    }

    report
}

/// Per-project counts of sessions migrated, for a post-run summary.
#[must_use]
pub fn migrated_counts_by_project(sessions: &SessionStore, migrated_session_ids: &[String]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for id in migrated_session_ids {
        if let Some(session) = sessions.get(id) {
            *counts.entry(session.project_id).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn legacy_session_with_matching_project_is_migrated() {
        let projects = ProjectStore::new();
        let sessions = SessionStore::new();
        let (project_id, _) = projects.ensure("alice", "/proj/x", Utc::now());

        let legacy = serde_json::json!({
            "session_id": "s1",
            "project_id": project_id,
            "owner_id": "alice",
            "started_at": Utc::now(),
            "last_seen": Utc::now(),
            "message_count": 3,
            "total_cost": 0.5,
        });

        let report = backfill_ownership(&projects, &sessions, &[legacy]);
        assert_eq!(report.sessions_migrated, 1);
        assert!(report.sessions_orphaned.is_empty());
        assert_eq!(sessions.get("s1").unwrap().project_id, project_id);
    }

    #[test]
    fn legacy_session_with_unknown_project_is_reported_orphaned() {
        let projects = ProjectStore::new();
        let sessions = SessionStore::new();

        let legacy = serde_json::json!({
            "session_id": "s1",
            "project_id": "missing-project",
            "started_at": Utc::now(),
            "last_seen": Utc::now(),
            "message_count": 0,
            "total_cost": 0.0,
        });

        let report = backfill_ownership(&projects, &sessions, &[legacy]);
        assert_eq!(report.sessions_migrated, 0);
        assert_eq!(report.sessions_orphaned, vec!["s1".to_string()]);
        assert!(sessions.get("s1").is_none());
    }

    #[test]
    fn mismatched_legacy_owner_still_migrates_trusting_the_project() {
        let projects = ProjectStore::new();
        let sessions = SessionStore::new();
        let (project_id, _) = projects.ensure("alice", "/proj/x", Utc::now());

        let legacy = serde_json::json!({
            "session_id": "s1",
            "project_id": project_id,
            "owner_id": "bob",
            "started_at": Utc::now(),
            "last_seen": Utc::now(),
            "message_count": 0,
            "total_cost": 0.0,
        });

        let report = backfill_ownership(&projects, &sessions, &[legacy]);
        assert_eq!(report.sessions_migrated, 1);
    }
}
