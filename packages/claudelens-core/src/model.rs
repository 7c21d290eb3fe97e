//! Data model: Project, Session, Message, and the backup/restore/rate-limit
//! records described in §3.
//!
//! Sessions and messages never carry an `owner_id`. Ownership is always
//! resolved transitively through `Project.owner_id` (see Design Note in
//! §9) — composing that predicate is the Ownership Resolver's job, not a
//! field on these structs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque nested structure for message content and tool-result bodies.
///
/// Modeled as a tagged-variant envelope around a schemaless JSON value
/// rather than a fixed struct, since the shape varies by `MessageType`
/// and by provider. Decoded lazily by consumers that know the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ContentPayload {
    Text(String),
    Structured(serde_json::Value),
    ToolUse {
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        output: serde_json::Value,
        is_error: bool,
    },
}

/// A project: a unique `(owner_id, path)` pair with denormalized counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    /// Canonical filesystem path, unique per owner.
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub session_count: u64,
    pub message_count: u64,
    pub total_bytes: u64,
}

impl Project {
    #[must_use]
    pub fn new(id: String, owner_id: String, path: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            path,
            created_at: now,
            session_count: 0,
            message_count: 0,
            total_bytes: 0,
        }
    }
}

/// A session: identified by an externally supplied opaque string, owned
/// transitively through its parent project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub project_id: String,
    pub started_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub message_count: u64,
    /// Rolled-up cost in a major currency unit (six decimal digits).
    pub total_cost: f64,
}

impl Session {
    #[must_use]
    pub fn new(session_id: String, project_id: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            project_id,
            started_at: now,
            last_seen: now,
            message_count: 0,
            total_cost: 0.0,
        }
    }
}

/// Message type discriminant, see §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Tool,
    Summary,
}

impl MessageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Summary => "summary",
        }
    }
}

/// Token usage counts attached to an assistant message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_creation_input_tokens == 0
            && self.cache_read_input_tokens == 0
    }
}

/// Optional attribution fields carried by assistant/tool messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attribution {
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Cost in micro-units of a major currency (1 unit = 1e-6 currency).
    pub cost_micros: Option<i64>,
    pub latency_ms: Option<u64>,
    pub git_branch: Option<String>,
    pub cwd: Option<String>,
}

/// A message: globally unique by `uuid`, belongs to exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub uuid: String,
    pub session_id: String,
    pub parent_uuid: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: ContentPayload,
    pub timestamp: DateTime<Utc>,
    /// Stable fingerprint of the normalized payload (Invariant I3).
    pub content_hash: String,
    pub attribution: Attribution,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a backup archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Corrupted,
    Deleting,
}

/// Describes one archive file (§3 Backup metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub creator_principal_id: String,
    pub file_path: String,
    pub size_bytes: u64,
    pub compressed_size_bytes: u64,
    pub checksum_sha256: Option<String>,
    pub content_counts: BTreeMap<String, u64>,
    /// Serialized `BackupFilter` used to select this archive's contents.
    pub filter_json: serde_json::Value,
    pub status: BackupStatus,
    pub error_message: Option<String>,
}

/// Restore mode, see §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    Full,
    Selective,
    Merge,
}

/// Conflict resolution policy applied per colliding entity, see §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    Skip,
    Overwrite,
    Rename,
    Merge,
}

/// Status of a restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Queued,
    Validating,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Describes one restore attempt (§3 Restore job).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: String,
    pub backup_id: String,
    pub requester_principal_id: String,
    pub mode: RestoreMode,
    pub conflict_policy: ConflictPolicy,
    pub status: RestoreStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// One rate-limited activity kind (§4.6 Axes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAxis {
    Http,
    Ingest,
    Ai,
    Export,
    Import,
    Backup,
    Restore,
    Search,
    Analytics,
    Websocket,
}

impl RateLimitAxis {
    pub const ALL: [RateLimitAxis; 10] = [
        Self::Http,
        Self::Ingest,
        Self::Ai,
        Self::Export,
        Self::Import,
        Self::Backup,
        Self::Restore,
        Self::Search,
        Self::Analytics,
        Self::Websocket,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ingest => "ingest",
            Self::Ai => "ai",
            Self::Export => "export",
            Self::Import => "import",
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Search => "search",
            Self::Analytics => "analytics",
            Self::Websocket => "websocket",
        }
    }
}

/// One bucketed rate-limit accounting record, keyed by `(user_id, axis, bucket_start)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub user_id: String,
    pub axis: RateLimitAxis,
    pub bucket_start: DateTime<Utc>,
    pub requests_made: u64,
    pub requests_allowed: u64,
    pub requests_blocked: u64,
    pub peak_usage_ratio: f64,
    pub avg_latency_ms: f64,
    pub bytes_transferred: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_str() {
        for t in [
            MessageType::User,
            MessageType::Assistant,
            MessageType::System,
            MessageType::Tool,
            MessageType::Summary,
        ] {
            assert!(!t.as_str().is_empty());
        }
    }

    #[test]
    fn rate_limit_axis_all_has_ten_entries() {
        assert_eq!(RateLimitAxis::ALL.len(), 10);
    }

    #[test]
    fn token_usage_default_is_empty() {
        assert!(TokenUsage::default().is_empty());
    }
}
