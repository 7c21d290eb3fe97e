//! Restore selection (§4.8 Modes: "selective: only entities matching
//! caller-supplied selectors"). Mirrors [`crate::backup::BackupFilter`]'s
//! shape but applies on the read side of an archive rather than the write
//! side of the data plane.

use serde::{Deserialize, Serialize};

/// Caller-supplied allowlists for a `selective` restore. Unset fields allow
/// everything, matching [`crate::backup::BackupFilter`]'s "no predicate
/// means no restriction" convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreSelector {
    pub project_ids: Option<Vec<String>>,
    pub session_ids: Option<Vec<String>>,
    pub message_uuids: Option<Vec<String>>,
}

impl RestoreSelector {
    #[must_use]
    pub fn allows_project(&self, project_id: &str) -> bool {
        self.project_ids.as_ref().is_none_or(|ids| ids.iter().any(|p| p == project_id))
    }

    #[must_use]
    pub fn allows_session(&self, session_id: &str) -> bool {
        self.session_ids.as_ref().is_none_or(|ids| ids.iter().any(|s| s == session_id))
    }

    #[must_use]
    pub fn allows_message(&self, uuid: &str) -> bool {
        self.message_uuids.as_ref().is_none_or(|ids| ids.iter().any(|u| u == uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_allow_everything() {
        let selector = RestoreSelector::default();
        assert!(selector.allows_project("p1"));
        assert!(selector.allows_session("s1"));
        assert!(selector.allows_message("m1"));
    }

    #[test]
    fn project_allowlist_restricts() {
        let selector = RestoreSelector {
            project_ids: Some(vec!["p1".to_string()]),
            ..Default::default()
        };
        assert!(selector.allows_project("p1"));
        assert!(!selector.allows_project("p2"));
    }
}
