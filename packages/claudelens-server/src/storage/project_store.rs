//! Project collection: unique `(owner_id, path)` pairs with denormalized counters.

use dashmap::DashMap;
use uuid::Uuid;

use claudelens_core::{CoreError, CoreResult, Project};

/// Concurrent project collection, indexed by id and by `(owner_id, path)`.
///
/// The secondary index exists because ingestion's "ensure a project exists
/// for this owner and path" step (§4.4) is the hot lookup; `by_id` backs
/// direct fetches from the Ownership Resolver and the read path.
pub struct ProjectStore {
    by_id: DashMap<String, Project>,
    by_owner_path: DashMap<(String, String), String>,
}

impl ProjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_owner_path: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Project> {
        self.by_id.get(id).map(|e| e.clone())
    }

    /// Materializes a project for `(owner_id, path)`, creating one if this
    /// is the first time this owner has used this path (§4.4 Project/session
    /// materialization). Returns `(project_id, created)`.
    pub fn ensure(&self, owner_id: &str, path: &str, now: chrono::DateTime<chrono::Utc>) -> (String, bool) {
        let index_key = (owner_id.to_string(), path.to_string());
        if let Some(existing) = self.by_owner_path.get(&index_key) {
            return (existing.clone(), false);
        }

        // Double-checked insert: two concurrent ingest batches for the same
        // new (owner, path) may race here; `DashMap::entry` makes the
        // winner's id authoritative and the loser discovers it via get.
        let mut created = false;
        let id = self
            .by_owner_path
            .entry(index_key)
            .or_insert_with(|| {
                created = true;
                Uuid::new_v4().to_string()
            })
            .clone();

        if created {
            self.by_id.insert(
                id.clone(),
                Project::new(id.clone(), owner_id.to_string(), path.to_string(), now),
            );
        }
        (id, created)
    }

    /// Writes a fully-formed project record directly, bypassing
    /// `ensure`'s "first writer wins" semantics (restore's apply pass,
    /// §4.8). Overwrites both indexes; the caller is responsible for
    /// deciding whether an existing id/path should be touched at all.
    pub fn restore_put(&self, project: Project) {
        let index_key = (project.owner_id.clone(), project.path.clone());
        self.by_owner_path.insert(index_key, project.id.clone());
        self.by_id.insert(project.id.clone(), project);
    }

    /// Project ids owned by `owner_id` (§4.2 `projects_of`).
    #[must_use]
    pub fn ids_owned_by(&self, owner_id: &str) -> Vec<String> {
        self.by_id
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| e.key().clone())
            .collect()
    }

    #[must_use]
    pub fn all_ids(&self) -> Vec<String> {
        self.by_id.iter().map(|e| e.key().clone()).collect()
    }

    /// Bumps denormalized counters after an ingest batch (§4.4).
    pub fn bump_counters(&self, project_id: &str, sessions_created: u64, messages_inserted: u64, bytes: u64) {
        if let Some(mut entry) = self.by_id.get_mut(project_id) {
            entry.session_count += sessions_created;
            entry.message_count += messages_inserted;
            entry.total_bytes += bytes;
        }
    }

    pub fn delete(&self, project_id: &str) -> CoreResult<()> {
        let project = self
            .by_id
            .remove(project_id)
            .ok_or(CoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            })?
            .1;
        self.by_owner_path
            .remove(&(project.owner_id, project.path));
        Ok(())
    }
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn ensure_creates_once_per_owner_path() {
        let store = ProjectStore::new();
        let now = Utc::now();
        let (id1, created1) = store.ensure("alice", "/proj/x", now);
        assert!(created1);
        let (id2, created2) = store.ensure("alice", "/proj/x", now);
        assert!(!created2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn tenant_isolation_same_path_different_owners() {
        let store = ProjectStore::new();
        let now = Utc::now();
        let (id_a, _) = store.ensure("alice", "/proj/x", now);
        let (id_b, _) = store.ensure("bob", "/proj/x", now);
        assert_ne!(id_a, id_b);
        assert_eq!(store.ids_owned_by("alice"), vec![id_a]);
        assert_eq!(store.ids_owned_by("bob"), vec![id_b]);
    }

    #[test]
    fn bump_counters_accumulates() {
        let store = ProjectStore::new();
        let (id, _) = store.ensure("alice", "/proj/x", Utc::now());
        store.bump_counters(&id, 1, 5, 1024);
        store.bump_counters(&id, 0, 3, 256);
        let project = store.get(&id).unwrap();
        assert_eq!(project.session_count, 1);
        assert_eq!(project.message_count, 8);
        assert_eq!(project.total_bytes, 1280);
    }

    #[test]
    fn restore_put_overwrites_both_indexes() {
        let store = ProjectStore::new();
        let now = Utc::now();
        let (id, _) = store.ensure("alice", "/proj/x", now);
        let mut restored = store.get(&id).unwrap();
        restored.message_count = 42;
        store.restore_put(restored);
        assert_eq!(store.get(&id).unwrap().message_count, 42);
        assert_eq!(store.ids_owned_by("alice"), vec![id]);
    }

    #[test]
    fn delete_removes_both_indexes() {
        let store = ProjectStore::new();
        let (id, _) = store.ensure("alice", "/proj/x", Utc::now());
        store.delete(&id).unwrap();
        assert!(store.get(&id).is_none());
        let (id2, created) = store.ensure("alice", "/proj/x", Utc::now());
        assert!(created);
        assert_ne!(id, id2);
    }
}
