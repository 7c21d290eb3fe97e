//! Backup selection filter (§4.7 Flow step 2, §3 Backup metadata).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a backup covers everything reachable from the acting principal
/// or a caller-supplied subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    Selective,
}

/// Selective-backup predicate (§4.7: "project subset, session subset, date
/// range, include/exclude patterns, message-count floor/ceiling").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupFilter {
    pub project_ids: Option<Vec<String>>,
    pub session_ids: Option<Vec<String>>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub min_message_count: Option<u64>,
    pub max_message_count: Option<u64>,
}

impl BackupFilter {
    #[must_use]
    pub fn allows_project(&self, project_id: &str) -> bool {
        self.project_ids.as_ref().is_none_or(|ids| ids.iter().any(|p| p == project_id))
    }

    #[must_use]
    pub fn allows_session(&self, session_id: &str) -> bool {
        self.session_ids.as_ref().is_none_or(|ids| ids.iter().any(|s| s == session_id))
    }

    #[must_use]
    pub fn allows_timestamp(&self, ts: DateTime<Utc>) -> bool {
        self.date_range.is_none_or(|(start, end)| ts >= start && ts <= end)
    }

    #[must_use]
    pub fn allows_message_count(&self, count: u64) -> bool {
        let floor_ok = self.min_message_count.is_none_or(|min| count >= min);
        let ceiling_ok = self.max_message_count.is_none_or(|max| count <= max);
        floor_ok && ceiling_ok
    }

    #[must_use]
    pub fn allows_path(&self, path: &str) -> bool {
        let included = self.include_patterns.is_empty() || self.include_patterns.iter().any(|p| path.contains(p.as_str()));
        let excluded = self.exclude_patterns.iter().any(|p| path.contains(p.as_str()));
        included && !excluded
    }
}
