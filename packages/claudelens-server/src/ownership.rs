//! Ownership Resolver (§4.2).
//!
//! Every read and write flows through this component. It never
//! materializes session->project->principal as pointer cycles (§9 Design
//! Note); it always composes the owner predicate from the project set via
//! explicit id lookups against [`ProjectStore`] and [`SessionStore`].

use std::sync::Arc;

use claudelens_core::Role;

use crate::storage::{ProjectStore, SessionStore};

/// A query-time filter: either "admin, no filter" or an explicit allowed
/// project/session id set, composed by [`OwnershipResolver::filter`].
#[derive(Debug, Clone)]
pub enum TenantFilter {
    Admin,
    Scoped {
        project_ids: Vec<String>,
        session_ids: Vec<String>,
    },
}

impl TenantFilter {
    #[must_use]
    pub fn allows_session(&self, session_id: &str) -> bool {
        match self {
            Self::Admin => true,
            Self::Scoped { session_ids, .. } => session_ids.iter().any(|s| s == session_id),
        }
    }

    #[must_use]
    pub fn allows_project(&self, project_id: &str) -> bool {
        match self {
            Self::Admin => true,
            Self::Scoped { project_ids, .. } => project_ids.iter().any(|p| p == project_id),
        }
    }
}

/// A session with no resolvable project, or a message with no resolvable
/// session -- surfaced as a diagnostic, never auto-deleted (SPEC_FULL §B
/// Orphaned-data detection).
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrphanReport {
    pub orphaned_session_ids: Vec<String>,
}

pub struct OwnershipResolver {
    projects: Arc<ProjectStore>,
    sessions: Arc<SessionStore>,
}

impl OwnershipResolver {
    #[must_use]
    pub fn new(projects: Arc<ProjectStore>, sessions: Arc<SessionStore>) -> Self {
        Self { projects, sessions }
    }

    /// Project ids a principal owns; admins see all (§4.2 `projects_of`).
    #[must_use]
    pub fn projects_of(&self, principal_id: &str, role: Role) -> Vec<String> {
        if role == Role::Admin {
            self.projects.all_ids()
        } else {
            self.projects.ids_owned_by(principal_id)
        }
    }

    /// Session ids whose project is owned by the principal (§4.2 `sessions_of`).
    #[must_use]
    pub fn sessions_of(&self, principal_id: &str, role: Role) -> Vec<String> {
        let project_ids = self.projects_of(principal_id, role);
        if role == Role::Admin {
            self.sessions.all_ids()
        } else {
            self.sessions.session_ids_for_projects(&project_ids)
        }
    }

    /// O(1) (after the lookups above are cached by the caller) ownership
    /// check for a single session (§4.2 `owns`).
    #[must_use]
    pub fn owns_session(&self, principal_id: &str, role: Role, session_id: &str) -> bool {
        if role == Role::Admin {
            return self.sessions.get(session_id).is_some();
        }
        match self.sessions.get(session_id) {
            Some(session) => self
                .projects
                .get(&session.project_id)
                .is_some_and(|p| p.owner_id == principal_id),
            None => false,
        }
    }

    #[must_use]
    pub fn owns_project(&self, principal_id: &str, role: Role, project_id: &str) -> bool {
        if role == Role::Admin {
            return self.projects.get(project_id).is_some();
        }
        self.projects
            .get(project_id)
            .is_some_and(|p| p.owner_id == principal_id)
    }

    /// Builds the filter every read/write composes into its query (§4.2
    /// `filter`). Admins bypass filtering entirely.
    #[must_use]
    pub fn filter(&self, principal_id: &str, role: Role) -> TenantFilter {
        if role == Role::Admin {
            return TenantFilter::Admin;
        }
        let project_ids = self.projects_of(principal_id, role);
        let session_ids = self.sessions.session_ids_for_projects(&project_ids);
        TenantFilter::Scoped {
            project_ids,
            session_ids,
        }
    }

    /// Reports sessions whose `project_id` does not resolve to any project
    /// (Invariant I1 as a checkable property, SPEC_FULL §B). Never deletes.
    #[must_use]
    pub fn find_orphans(&self) -> OrphanReport {
        let orphaned_session_ids = self
            .sessions
            .all_ids()
            .into_iter()
            .filter(|session_id| {
                self.sessions
                    .get(session_id)
                    .is_some_and(|s| self.projects.get(&s.project_id).is_none())
            })
            .collect();
        OrphanReport { orphaned_session_ids }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn setup() -> (OwnershipResolver, Arc<ProjectStore>, Arc<SessionStore>) {
        let projects = Arc::new(ProjectStore::new());
        let sessions = Arc::new(SessionStore::new());
        let resolver = OwnershipResolver::new(projects.clone(), sessions.clone());
        (resolver, projects, sessions)
    }

    #[test]
    fn tenant_isolation_scenario_3() {
        let (resolver, projects, _sessions) = setup();
        let now = Utc::now();
        let (proj_a, _) = projects.ensure("alice", "/proj/x", now);
        let (proj_b, _) = projects.ensure("bob", "/proj/x", now);

        assert!(resolver.owns_project("alice", Role::User, &proj_a));
        assert!(!resolver.owns_project("alice", Role::User, &proj_b));
        assert!(resolver.owns_project("bob", Role::User, &proj_b));
    }

    #[test]
    fn admin_bypasses_every_filter() {
        let (resolver, projects, _sessions) = setup();
        let (proj, _) = projects.ensure("alice", "/proj/x", Utc::now());
        assert!(matches!(
            resolver.filter("admin-1", Role::Admin),
            TenantFilter::Admin
        ));
        assert!(resolver.owns_project("admin-1", Role::Admin, &proj));
    }

    #[test]
    fn filter_scopes_to_owned_sessions_only() {
        let (resolver, projects, sessions) = setup();
        let now = Utc::now();
        let (proj_a, _) = projects.ensure("alice", "/proj/x", now);
        sessions.ensure("s1", &proj_a, now);

        let filter = resolver.filter("alice", Role::User);
        assert!(filter.allows_session("s1"));
        assert!(!filter.allows_session("s-unknown"));
    }

    #[test]
    fn find_orphans_reports_session_with_missing_project() {
        let (resolver, _projects, sessions) = setup();
        sessions.ensure("orphan-1", "ghost-project", Utc::now());
        let report = resolver.find_orphans();
        assert_eq!(report.orphaned_session_ids, vec!["orphan-1".to_string()]);
    }
}
