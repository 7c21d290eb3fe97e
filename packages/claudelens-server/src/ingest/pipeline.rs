//! The Ingestion Pipeline (§4.4): validates, deduplicates, upserts, and
//! materializes projects/sessions for a batch of message records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use claudelens_core::{
    content_hash, Attribution, CoreError, CoreResult, Message, MessageType, Principal, TokenUsage,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::cost::PricingTable;
use crate::ingest::sanitize::sanitize_json;
use crate::ingest::validation::validate_record;
use crate::storage::{MessageStore, ProjectStore, SessionStore};

/// One raw record in an ingest batch, as decoded from the request body
/// (§3 Message, §6 Ingest batch request).
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub uuid: String,
    pub session_id: String,
    pub parent_uuid: Option<String>,
    pub message_type: MessageType,
    pub content: Option<claudelens_core::ContentPayload>,
    pub timestamp: DateTime<Utc>,
    pub cost: Option<f64>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    pub latency_ms: Option<u64>,
    pub git_branch: Option<String>,
    pub cwd: String,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub records: Vec<IngestRecord>,
    pub overwrite_mode: bool,
}

/// Per-record outcome, used for both counting and per-record error
/// reporting (§4.4 Return value, §7 Partial-failure).
#[derive(Debug, Clone, Serialize)]
pub enum IngestOutcome {
    Inserted,
    /// Carries `new_cost_micros - old_cost_micros` (§9 Open Question:
    /// overwrite-mode recomputes a session's cost rollup rather than
    /// accumulating every version ever ingested; tracking the delta here
    /// keeps `Session::total_cost` an accurate running recomputation
    /// without rescanning every message the session owns).
    Updated { cost_micros_delta: i64 },
    Skipped,
    Failed { field_errors: Vec<String> },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub sessions_created: u64,
    pub projects_created: Vec<String>,
    pub duration_ms: u64,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub uuid: String,
    pub message: String,
}

pub struct IngestionPipeline {
    projects: Arc<ProjectStore>,
    sessions: Arc<SessionStore>,
    messages: Arc<MessageStore>,
    pricing: Arc<PricingTable>,
    broadcaster: Arc<ProgressBroadcaster>,
    max_batch_size: usize,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        projects: Arc<ProjectStore>,
        sessions: Arc<SessionStore>,
        messages: Arc<MessageStore>,
        pricing: Arc<PricingTable>,
        broadcaster: Arc<ProgressBroadcaster>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            projects,
            sessions,
            messages,
            pricing,
            broadcaster,
            max_batch_size,
        }
    }

    /// Runs one ingest batch to completion. On partial per-record failure,
    /// every other record in the batch is still processed (§4.4 Return
    /// value, §7 Propagation) -- only a batch that exceeds the size limit
    /// is rejected outright.
    #[instrument(skip(self, request), fields(job_id = %job_id, batch_size = request.records.len()))]
    pub async fn ingest(
        &self,
        principal: &Principal,
        request: IngestRequest,
        job_id: &str,
    ) -> CoreResult<IngestStats> {
        if request.records.len() > self.max_batch_size {
            return Err(CoreError::ValidationFailure {
                message: format!(
                    "batch of {} exceeds the maximum of {}",
                    request.records.len(),
                    self.max_batch_size
                ),
                fields: BTreeMap::new(),
            });
        }

        let start = std::time::Instant::now();
        let total = request.records.len();
        let mut stats = IngestStats {
            received: total as u64,
            ..Default::default()
        };

        // project/session timestamp and cost rollups accumulated across the
        // batch, applied once per distinct session at the end (§4.4
        // Project/session materialization).
        let mut session_min_ts: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut session_max_ts: HashMap<String, DateTime<Utc>> = HashMap::new();
        let mut session_inserted_count: HashMap<String, u64> = HashMap::new();
        let mut session_cost_delta: HashMap<String, f64> = HashMap::new();
        let mut session_project: HashMap<String, String> = HashMap::new();
        let mut project_sessions_created: HashMap<String, u64> = HashMap::new();
        let mut projects_created = Vec::new();
        let mut sessions_created = 0u64;

        for (index, record) in request.records.into_iter().enumerate() {
            let field_errors = validate_record(&record);
            if !field_errors.is_empty() {
                stats.failed += 1;
                stats.errors.push(RecordError {
                    uuid: record.uuid.clone(),
                    message: field_errors
                        .iter()
                        .map(|e| format!("{}: {}", e.field, e.message))
                        .collect::<Vec<_>>()
                        .join("; "),
                });
                continue;
            }

            let (project_id, project_created) =
                self.projects.ensure(&principal.user_id, &record.cwd, record.timestamp);
            if project_created {
                projects_created.push(project_id.clone());
            }

            let session_created = self.sessions.ensure(&record.session_id, &project_id, record.timestamp);
            if session_created {
                sessions_created += 1;
                *project_sessions_created.entry(project_id.clone()).or_insert(0) += 1;
            }
            session_project.insert(record.session_id.clone(), project_id);

            let outcome = self.upsert_one(&record, request.overwrite_mode);
            match outcome {
                Ok(IngestOutcome::Inserted) => {
                    stats.inserted += 1;
                    let cost = record.cost.unwrap_or_else(|| {
                        record
                            .model
                            .as_ref()
                            .zip(record.usage)
                            .map(|(model, usage)| self.pricing.compute_cost_micros(model, usage) as f64 / 1_000_000.0)
                            .unwrap_or(0.0)
                    });
                    track_session_rollup(
                        &mut session_min_ts,
                        &mut session_max_ts,
                        &mut session_inserted_count,
                        &mut session_cost_delta,
                        &record,
                        1,
                        cost,
                    );
                }
                Ok(IngestOutcome::Updated { cost_micros_delta }) => {
                    stats.updated += 1;
                    track_session_rollup(
                        &mut session_min_ts,
                        &mut session_max_ts,
                        &mut session_inserted_count,
                        &mut session_cost_delta,
                        &record,
                        0,
                        cost_micros_delta as f64 / 1_000_000.0,
                    );
                }
                Ok(IngestOutcome::Skipped) => stats.skipped += 1,
                Ok(IngestOutcome::Failed { field_errors }) => {
                    stats.failed += 1;
                    stats.errors.push(RecordError {
                        uuid: record.uuid.clone(),
                        message: field_errors.join("; "),
                    });
                }
                Err(err) => {
                    stats.failed += 1;
                    stats.errors.push(RecordError {
                        uuid: record.uuid.clone(),
                        message: err.to_string(),
                    });
                }
            }

            if (index + 1) % 50 == 0 || index + 1 == total {
                self.broadcaster.publish(
                    job_id,
                    ProgressEvent::progress(job_id, "ingest", index as u64 + 1, total as u64),
                );
            }
        }

        for (session_id, project_id) in &session_project {
            let min_ts = session_min_ts.get(session_id).copied();
            let max_ts = session_max_ts.get(session_id).copied();
            if let (Some(min_ts), Some(max_ts)) = (min_ts, max_ts) {
                let inserted = session_inserted_count.get(session_id).copied().unwrap_or(0);
                let cost_delta = session_cost_delta.get(session_id).copied().unwrap_or(0.0);
                self.sessions
                    .apply_batch_update(session_id, min_ts, max_ts, inserted, cost_delta);
                self.projects.bump_counters(project_id, 0, inserted, 0);
            }
        }

        // session_count is bumped once per project here rather than inside the
        // per-session loop above, since several sessions in the same batch can
        // share a project and would otherwise double-count.
        for (project_id, new_sessions) in &project_sessions_created {
            self.projects.bump_counters(project_id, *new_sessions, 0, 0);
        }

        stats.sessions_created = sessions_created;
        stats.projects_created = projects_created;
        stats.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            "ingest batch complete"
        );

        self.broadcaster.publish(
            job_id,
            ProgressEvent::completed(job_id, "ingest", "ingest batch complete"),
        );

        Ok(stats)
    }

    /// Applies deduplication semantics for one record (§4.4 Deduplication).
    fn upsert_one(&self, record: &IngestRecord, overwrite_mode: bool) -> CoreResult<IngestOutcome> {
        let normalized = normalize_content(record);
        let hash = content_hash(&normalized);

        let exists = self.messages.contains(&record.uuid);

        if exists && !overwrite_mode {
            return Ok(IngestOutcome::Skipped);
        }

        if exists {
            let existing = self
                .messages
                .get(&record.uuid, Some(record.timestamp))
                .or_else(|| self.messages.get(&record.uuid, None));
            let previous_cost_micros = existing.as_ref().and_then(|m| m.attribution.cost_micros).unwrap_or(0);
            if let Some(existing) = &existing {
                if existing.content_hash == hash {
                    return Ok(IngestOutcome::Skipped);
                }
            }
            let message = self.build_message(record, hash);
            let new_cost_micros = message.attribution.cost_micros.unwrap_or(0);
            self.messages.replace(message)?;
            return Ok(IngestOutcome::Updated {
                cost_micros_delta: new_cost_micros - previous_cost_micros,
            });
        }

        let message = self.build_message(record, hash);
        self.messages.insert(message)?;
        Ok(IngestOutcome::Inserted)
    }

    fn build_message(&self, record: &IngestRecord, content_hash: String) -> Message {
        let cost_micros = record.cost.map(|c| (c * 1_000_000.0).round() as i64).or_else(|| {
            record
                .model
                .as_ref()
                .zip(record.usage)
                .map(|(model, usage)| self.pricing.compute_cost_micros(model, usage))
        });

        Message {
            uuid: record.uuid.clone(),
            session_id: record.session_id.clone(),
            parent_uuid: record.parent_uuid.clone(),
            message_type: record.message_type,
            content: record
                .content
                .clone()
                .unwrap_or(claudelens_core::ContentPayload::Text(String::new())),
            timestamp: record.timestamp,
            content_hash,
            attribution: Attribution {
                model: record.model.clone(),
                usage: record.usage,
                cost_micros,
                latency_ms: record.latency_ms,
                git_branch: record.git_branch.clone(),
                cwd: Some(record.cwd.clone()),
            },
            created_at: record.timestamp,
            updated_at: record.timestamp,
        }
    }
}

fn normalize_content(record: &IngestRecord) -> Vec<u8> {
    let content = record
        .content
        .clone()
        .unwrap_or(claudelens_core::ContentPayload::Text(String::new()));
    let value = serde_json::to_value(&content).unwrap_or(serde_json::Value::Null);
    let sanitized = sanitize_json(value);
    serde_json::to_vec(&sanitized).unwrap_or_default()
}

#[allow(clippy::too_many_arguments)]
fn track_session_rollup(
    min_ts: &mut HashMap<String, DateTime<Utc>>,
    max_ts: &mut HashMap<String, DateTime<Utc>>,
    inserted_count: &mut HashMap<String, u64>,
    cost_delta: &mut HashMap<String, f64>,
    record: &IngestRecord,
    increment: u64,
    cost_delta_usd: f64,
) {
    min_ts
        .entry(record.session_id.clone())
        .and_modify(|t| *t = (*t).min(record.timestamp))
        .or_insert(record.timestamp);
    max_ts
        .entry(record.session_id.clone())
        .and_modify(|t| *t = (*t).max(record.timestamp))
        .or_insert(record.timestamp);
    *inserted_count.entry(record.session_id.clone()).or_insert(0) += increment;
    *cost_delta.entry(record.session_id.clone()).or_insert(0.0) += cost_delta_usd;
}

/// Distinct `cwd` values present in a batch, used by callers that want to
/// pre-flight project materialization counts before running `ingest`.
#[must_use]
pub fn distinct_cwds(records: &[IngestRecord]) -> HashSet<String> {
    records.iter().map(|r| r.cwd.clone()).collect()
}
