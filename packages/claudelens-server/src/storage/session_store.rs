//! Session collection, keyed by the externally supplied `session_id`.
//!
//! Sessions never carry `owner_id` (§9 Design Note, §3 Session): ownership
//! is always resolved transitively through `project_id`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use claudelens_core::{CoreError, CoreResult, Session};

pub struct SessionStore {
    by_id: DashMap<String, Session>,
    /// Secondary index for the Ownership Resolver's `sessions_of`.
    by_project: DashMap<String, Vec<String>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_project: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.by_id.get(session_id).map(|e| e.clone())
    }

    /// Materializes a session with `project_id` set, creating one if this
    /// `session_id` has not been seen (§4.4). Returns `(created)`.
    pub fn ensure(&self, session_id: &str, project_id: &str, now: DateTime<Utc>) -> bool {
        let mut created = false;
        self.by_id.entry(session_id.to_string()).or_insert_with(|| {
            created = true;
            Session::new(session_id.to_string(), project_id.to_string(), now)
        });
        if created {
            self.by_project
                .entry(project_id.to_string())
                .or_default()
                .push(session_id.to_string());
        }
        created
    }

    /// Updates `started_at` (min), `last_seen` (max), bumps `message_count`
    /// by the inserted count only, and adds to `total_cost` (§4.4).
    pub fn apply_batch_update(
        &self,
        session_id: &str,
        min_timestamp: DateTime<Utc>,
        max_timestamp: DateTime<Utc>,
        inserted_count: u64,
        cost_delta: f64,
    ) {
        if let Some(mut entry) = self.by_id.get_mut(session_id) {
            if min_timestamp < entry.started_at {
                entry.started_at = min_timestamp;
            }
            if max_timestamp > entry.last_seen {
                entry.last_seen = max_timestamp;
            }
            entry.message_count += inserted_count;
            entry.total_cost += cost_delta;
        }
    }

    /// Writes a fully-formed session record directly, bypassing `ensure`'s
    /// blank-`Session::new` default (restore's apply pass, §4.8). Registers
    /// the id under `project_id` if it isn't already indexed there.
    pub fn restore_put(&self, session: Session) {
        if let Some(previous) = self.by_id.get(&session.session_id) {
            if previous.project_id != session.project_id {
                if let Some(mut old_ids) = self.by_project.get_mut(&previous.project_id) {
                    old_ids.retain(|id| id != &session.session_id);
                }
            }
        }
        let mut ids = self.by_project.entry(session.project_id.clone()).or_default();
        if !ids.contains(&session.session_id) {
            ids.push(session.session_id.clone());
        }
        drop(ids);
        self.by_id.insert(session.session_id.clone(), session);
    }

    #[must_use]
    pub fn session_ids_for_projects(&self, project_ids: &[String]) -> Vec<String> {
        project_ids
            .iter()
            .filter_map(|p| self.by_project.get(p))
            .flat_map(|ids| ids.clone())
            .collect()
    }

    #[must_use]
    pub fn all_ids(&self) -> Vec<String> {
        self.by_id.iter().map(|e| e.key().clone()).collect()
    }

    pub fn delete(&self, session_id: &str) -> CoreResult<()> {
        let session = self
            .by_id
            .remove(session_id)
            .ok_or(CoreError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?
            .1;
        if let Some(mut ids) = self.by_project.get_mut(&session.project_id) {
            ids.retain(|id| id != session_id);
        }
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
