//! The Restore Engine (§4.8): a validation pass that never touches the data
//! plane, followed by an apply pass that does, protected by a rollback
//! journal that undoes every mutation on failure or cancellation.
//!
//! Grounded on [`crate::backup::BackupEngine`]'s constructor-injection shape
//! and progress cadence; reads archives the same way
//! [`crate::restore::preview`] does, and reuses [`super::preview::validate_archive`]
//! directly for the validation pass rather than re-walking the stream twice.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use claudelens_core::{
    ConflictPolicy, CoreError, CoreResult, Message, Principal, Project, RestoreJob, RestoreMode, Session,
};
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tracing::instrument;
use uuid::Uuid;

use crate::backup::{read_header, ArchiveLine, SECTION_ORDER};
use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::jobs::CancelToken;
use crate::storage::{MessageStore, ProjectStore, SessionStore};

use super::job_store::RestoreJobStore;
use super::journal::{Collection, RollbackJournal};
use super::preview::validate_archive;
use super::selector::RestoreSelector;

/// Documents per progress tick within a section, matching
/// [`crate::backup::engine`]'s cadence.
const PROGRESS_BATCH: u64 = 50;

/// Additional statistics beyond the job's terminal status (§4.8).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreStats {
    pub documents_inserted: u64,
    pub documents_replaced: u64,
    pub documents_merged: u64,
    pub documents_skipped: u64,
    pub conflict_counts: BTreeMap<String, u64>,
}

pub struct RestoreEngine {
    projects: Arc<ProjectStore>,
    sessions: Arc<SessionStore>,
    messages: Arc<MessageStore>,
    jobs: Arc<RestoreJobStore>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl RestoreEngine {
    #[must_use]
    pub fn new(
        projects: Arc<ProjectStore>,
        sessions: Arc<SessionStore>,
        messages: Arc<MessageStore>,
        jobs: Arc<RestoreJobStore>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            projects,
            sessions,
            messages,
            jobs,
            broadcaster,
        }
    }

    #[must_use]
    pub fn job_store(&self) -> &RestoreJobStore {
        &self.jobs
    }

    /// Runs one restore to completion: validate, then apply, rolling back
    /// everything the apply pass did if it fails or is cancelled partway
    /// through (§4.8 Rollback, §5 Cancellation: "a cancelled restore still
    /// runs its rollback").
    #[instrument(skip(self, selector, validate_source, apply_source, cancel), fields(job_id = %job_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn run_restore<RV, RA>(
        &self,
        principal: &Principal,
        backup_id: String,
        mode: RestoreMode,
        conflict_policy: ConflictPolicy,
        selector: RestoreSelector,
        validate_source: RV,
        apply_source: RA,
        expected_compressed_bytes: Option<u64>,
        actual_compressed_bytes: u64,
        job_id: &str,
        cancel: &CancelToken,
    ) -> CoreResult<(RestoreJob, RestoreStats)>
    where
        RV: AsyncBufRead + Unpin,
        RA: AsyncBufRead + Unpin,
    {
        let restore_id = Uuid::new_v4().to_string();
        let job = self.jobs.create(
            restore_id.clone(),
            backup_id,
            principal.user_id.clone(),
            mode,
            conflict_policy,
        );

        self.jobs.mark_validating(&job.id);
        if let Err(err) = validate_archive(validate_source, expected_compressed_bytes, actual_compressed_bytes).await
        {
            self.jobs.fail(&job.id, err.to_string());
            self.broadcaster
                .publish(job_id, ProgressEvent::failed(job_id, "restore", &err.to_string()));
            return Err(err);
        }

        self.jobs.mark_processing(&job.id);
        let mut journal = RollbackJournal::new();
        let result = self
            .apply_pass(apply_source, mode, conflict_policy, &selector, job_id, cancel, &mut journal)
            .await;

        match result {
            Ok(stats) => {
                self.jobs.complete(&job.id);
                self.broadcaster
                    .publish(job_id, ProgressEvent::completed(job_id, "restore", "restore completed"));
                Ok((self.jobs.get(&job.id).expect("just inserted"), stats))
            }
            Err(err) => {
                self.rollback(&journal);
                if matches!(err, CoreError::Cancelled) {
                    self.jobs.cancel(&job.id);
                    self.broadcaster.publish(job_id, ProgressEvent::cancelled(job_id, "restore"));
                } else {
                    self.jobs.fail(&job.id, err.to_string());
                    self.broadcaster
                        .publish(job_id, ProgressEvent::failed(job_id, "restore", &err.to_string()));
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_pass<R: AsyncBufRead + Unpin>(
        &self,
        source: R,
        mode: RestoreMode,
        conflict_policy: ConflictPolicy,
        selector: &RestoreSelector,
        job_id: &str,
        cancel: &CancelToken,
        journal: &mut RollbackJournal,
    ) -> CoreResult<RestoreStats> {
        let (_header, mut reader) = read_header(source).await?;
        let mut stats = RestoreStats::default();
        // Restoring a renamed project must re-point any session that
        // referenced its old id (§9 Open Question: id-mapping propagation is
        // applied one level -- project to session -- but not propagated
        // further into message `session_id`/`parent_uuid`; see DESIGN.md).
        let mut project_id_remap: HashMap<String, String> = HashMap::new();
        let mut current_section: Option<String> = None;
        let mut section_doc_count: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            match reader.next_line().await? {
                Some(ArchiveLine::SectionHeader(name)) => {
                    current_section = SECTION_ORDER.contains(&name.as_str()).then_some(name);
                    section_doc_count = 0;
                }
                Some(ArchiveLine::Document(doc)) => {
                    let Some(section) = current_section.clone() else {
                        continue;
                    };
                    match section.as_str() {
                        "projects" => {
                            self.apply_project(doc, mode, conflict_policy, selector, journal, &mut stats, &mut project_id_remap)?;
                        }
                        "sessions" => {
                            self.apply_session(doc, mode, conflict_policy, selector, journal, &mut stats, &project_id_remap)?;
                        }
                        "messages" => {
                            self.apply_message(doc, mode, conflict_policy, selector, journal, &mut stats)?;
                        }
                        // `prompts` is always empty (no modeled entity) and
                        // `settings` applies outside the data plane, through
                        // the settings cache -- neither has a store-level
                        // counterpart here.
                        _ => {}
                    }
                    section_doc_count += 1;
                    if section_doc_count % PROGRESS_BATCH == 0 {
                        self.broadcaster
                            .publish(job_id, ProgressEvent::progress(job_id, &section, section_doc_count, section_doc_count));
                    }
                }
                Some(ArchiveLine::Footer(_)) => break,
                None => {
                    return Err(CoreError::Corruption {
                        offset: 0,
                        message: "archive ended without a footer".to_string(),
                    })
                }
            }
        }
        Ok(stats)
    }

    fn apply_project(
        &self,
        doc: serde_json::Value,
        mode: RestoreMode,
        policy: ConflictPolicy,
        selector: &RestoreSelector,
        journal: &mut RollbackJournal,
        stats: &mut RestoreStats,
        project_id_remap: &mut HashMap<String, String>,
    ) -> CoreResult<()> {
        let mut project: Project = serde_json::from_value(doc).map_err(|e| CoreError::Corruption {
            offset: 0,
            message: format!("malformed project document: {e}"),
        })?;

        if mode == RestoreMode::Selective && !selector.allows_project(&project.id) {
            stats.documents_skipped += 1;
            return Ok(());
        }

        let Some(existing) = self.projects.get(&project.id) else {
            journal.record_insert(Collection::Project, project.id.clone());
            self.projects.restore_put(project);
            stats.documents_inserted += 1;
            return Ok(());
        };

        *stats.conflict_counts.entry("projects".to_string()).or_insert(0) += 1;
        match policy {
            ConflictPolicy::Skip => stats.documents_skipped += 1,
            ConflictPolicy::Overwrite => {
                journal.record_pre_image(Collection::Project, project.id.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                self.projects.restore_put(project);
                stats.documents_replaced += 1;
            }
            ConflictPolicy::Rename => {
                let new_id = Uuid::new_v4().to_string();
                project_id_remap.insert(project.id.clone(), new_id.clone());
                project.id = new_id.clone();
                journal.record_insert(Collection::Project, new_id);
                self.projects.restore_put(project);
                stats.documents_inserted += 1;
            }
            ConflictPolicy::Merge => {
                journal.record_pre_image(Collection::Project, project.id.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                let merged = Project {
                    id: existing.id.clone(),
                    owner_id: existing.owner_id.clone(),
                    path: existing.path.clone(),
                    created_at: existing.created_at.min(project.created_at),
                    session_count: existing.session_count.max(project.session_count),
                    message_count: existing.message_count.max(project.message_count),
                    total_bytes: existing.total_bytes.max(project.total_bytes),
                };
                self.projects.restore_put(merged);
                stats.documents_merged += 1;
            }
        }
        Ok(())
    }

    fn apply_session(
        &self,
        doc: serde_json::Value,
        mode: RestoreMode,
        policy: ConflictPolicy,
        selector: &RestoreSelector,
        journal: &mut RollbackJournal,
        stats: &mut RestoreStats,
        project_id_remap: &HashMap<String, String>,
    ) -> CoreResult<()> {
        let mut session: Session = serde_json::from_value(doc).map_err(|e| CoreError::Corruption {
            offset: 0,
            message: format!("malformed session document: {e}"),
        })?;
        if let Some(remapped) = project_id_remap.get(&session.project_id) {
            session.project_id = remapped.clone();
        }

        if mode == RestoreMode::Selective && !selector.allows_session(&session.session_id) {
            stats.documents_skipped += 1;
            return Ok(());
        }

        let Some(existing) = self.sessions.get(&session.session_id) else {
            journal.record_insert(Collection::Session, session.session_id.clone());
            self.sessions.restore_put(session);
            stats.documents_inserted += 1;
            return Ok(());
        };

        *stats.conflict_counts.entry("sessions".to_string()).or_insert(0) += 1;
        match policy {
            ConflictPolicy::Skip => stats.documents_skipped += 1,
            ConflictPolicy::Overwrite => {
                journal.record_pre_image(Collection::Session, session.session_id.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                self.sessions.restore_put(session);
                stats.documents_replaced += 1;
            }
            ConflictPolicy::Rename => {
                let new_id = format!("{}-restored-{}", session.session_id, Uuid::new_v4());
                session.session_id = new_id.clone();
                journal.record_insert(Collection::Session, new_id);
                self.sessions.restore_put(session);
                stats.documents_inserted += 1;
            }
            ConflictPolicy::Merge => {
                journal.record_pre_image(Collection::Session, session.session_id.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                let merged = Session {
                    session_id: existing.session_id.clone(),
                    project_id: existing.project_id.clone(),
                    started_at: existing.started_at.min(session.started_at),
                    last_seen: existing.last_seen.max(session.last_seen),
                    message_count: existing.message_count.max(session.message_count),
                    total_cost: existing.total_cost.max(session.total_cost),
                };
                self.sessions.restore_put(merged);
                stats.documents_merged += 1;
            }
        }
        Ok(())
    }

    fn apply_message(
        &self,
        doc: serde_json::Value,
        mode: RestoreMode,
        policy: ConflictPolicy,
        selector: &RestoreSelector,
        journal: &mut RollbackJournal,
        stats: &mut RestoreStats,
    ) -> CoreResult<()> {
        let mut message: Message = serde_json::from_value(doc).map_err(|e| CoreError::Corruption {
            offset: 0,
            message: format!("malformed message document: {e}"),
        })?;

        if mode == RestoreMode::Selective && !selector.allows_message(&message.uuid) {
            stats.documents_skipped += 1;
            return Ok(());
        }

        if !self.messages.contains(&message.uuid) {
            journal.record_insert(Collection::Message, message.uuid.clone());
            self.messages.insert(message)?;
            stats.documents_inserted += 1;
            return Ok(());
        }

        let existing = self
            .messages
            .get(&message.uuid, Some(message.timestamp))
            .or_else(|| self.messages.get(&message.uuid, None))
            .ok_or_else(|| CoreError::NotFound {
                entity: "message",
                id: message.uuid.clone(),
            })?;

        *stats.conflict_counts.entry("messages".to_string()).or_insert(0) += 1;
        match policy {
            ConflictPolicy::Skip => stats.documents_skipped += 1,
            ConflictPolicy::Overwrite => {
                journal.record_pre_image(Collection::Message, message.uuid.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                self.messages.replace(message)?;
                stats.documents_replaced += 1;
            }
            ConflictPolicy::Rename => {
                let new_uuid = Uuid::new_v4().to_string();
                message.uuid = new_uuid.clone();
                journal.record_insert(Collection::Message, new_uuid);
                self.messages.insert(message)?;
                stats.documents_inserted += 1;
            }
            ConflictPolicy::Merge => {
                journal.record_pre_image(Collection::Message, message.uuid.clone(), serde_json::to_value(&existing).map_err(|e| CoreError::Internal(e.into()))?);
                // Message bodies are immutable under default ingest; merge
                // only fills attribution fields the existing copy lacks,
                // rather than letting the incoming copy clobber content.
                let mut merged = existing.clone();
                merged.attribution.model = merged.attribution.model.or(message.attribution.model);
                merged.attribution.usage = merged.attribution.usage.or(message.attribution.usage);
                merged.attribution.cost_micros = merged.attribution.cost_micros.or(message.attribution.cost_micros);
                merged.attribution.latency_ms = merged.attribution.latency_ms.or(message.attribution.latency_ms);
                merged.attribution.git_branch = merged.attribution.git_branch.or(message.attribution.git_branch);
                merged.attribution.cwd = merged.attribution.cwd.or(message.attribution.cwd);
                merged.updated_at = merged.updated_at.max(message.updated_at);
                self.messages.replace(merged)?;
                stats.documents_merged += 1;
            }
        }
        Ok(())
    }

    /// Undoes every mutation recorded in `journal`: deletes everything
    /// inserted, then restores every pre-image (§4.8 Rollback). Tolerates
    /// missing rows so a retried rollback is idempotent.
    fn rollback(&self, journal: &RollbackJournal) {
        for (collection, id) in journal.inserted_ids().iter().rev() {
            let _ = match collection {
                Collection::Project => self.projects.delete(id),
                Collection::Session => self.sessions.delete(id),
                Collection::Message => self.messages.delete(id),
            };
        }
        for (collection, _id, pre_image) in journal.pre_images().iter().rev() {
            match collection {
                Collection::Project => {
                    if let Ok(project) = serde_json::from_value::<Project>(pre_image.clone()) {
                        self.projects.restore_put(project);
                    }
                }
                Collection::Session => {
                    if let Ok(session) = serde_json::from_value::<Session>(pre_image.clone()) {
                        self.sessions.restore_put(session);
                    }
                }
                Collection::Message => {
                    if let Ok(message) = serde_json::from_value::<Message>(pre_image.clone()) {
                        let _ = self.messages.replace(message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{ArchiveHeader, ArchiveWriter};
    use chrono::Utc;
    use claudelens_core::{Attribution, ContentPayload, MessageType, Role};
    use tokio::io::BufReader;

    fn principal(user_id: &str) -> Principal {
        Principal {
            user_id: user_id.to_string(),
            role: Role::User,
            permissions: Vec::new(),
            api_key_label: None,
            auth_method: claudelens_core::AuthMethod::ApiKey,
        }
    }

    fn header() -> ArchiveHeader {
        ArchiveHeader {
            version: 1,
            created_at: Utc::now(),
            filters: serde_json::json!({}),
            content_counts: BTreeMap::new(),
            checksum_algo: "sha256".to_string(),
        }
    }

    fn message(uuid: &str, session_id: &str, ts: chrono::DateTime<Utc>) -> Message {
        Message {
            uuid: uuid.to_string(),
            session_id: session_id.to_string(),
            parent_uuid: None,
            message_type: MessageType::User,
            content: ContentPayload::Text("hi".to_string()),
            timestamp: ts,
            content_hash: "h".to_string(),
            attribution: Attribution::default(),
            created_at: ts,
            updated_at: ts,
        }
    }

    async fn archive_with_project_session_message(project_id: &str, session_id: &str, uuid: &str) -> Vec<u8> {
        let now = Utc::now();
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf, 3, &header()).await.unwrap();
        writer.write_section_header("projects").await.unwrap();
        writer
            .write_document(&serde_json::to_value(Project::new(project_id.to_string(), "alice".to_string(), "/p".to_string(), now)).unwrap())
            .await
            .unwrap();
        writer.write_section_header("sessions").await.unwrap();
        writer
            .write_document(&serde_json::to_value(Session::new(session_id.to_string(), project_id.to_string(), now)).unwrap())
            .await
            .unwrap();
        writer.write_section_header("messages").await.unwrap();
        writer
            .write_document(&serde_json::to_value(message(uuid, session_id, now)).unwrap())
            .await
            .unwrap();
        writer.write_section_header("prompts").await.unwrap();
        writer.write_section_header("settings").await.unwrap();
        writer.finish().await.unwrap();
        buf
    }

    fn engine() -> (RestoreEngine, Arc<ProjectStore>, Arc<SessionStore>, Arc<MessageStore>) {
        let projects = Arc::new(ProjectStore::new());
        let sessions = Arc::new(SessionStore::new());
        let messages = Arc::new(MessageStore::new());
        let jobs = Arc::new(RestoreJobStore::new());
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let restore_engine = RestoreEngine::new(projects.clone(), sessions.clone(), messages.clone(), jobs, broadcaster);
        (restore_engine, projects, sessions, messages)
    }

    #[tokio::test]
    async fn full_restore_inserts_every_section() {
        let (engine, projects, sessions, messages) = engine();
        let buf = archive_with_project_session_message("p1", "s1", "m1").await;
        let len = buf.len() as u64;

        let cancel = CancelToken::new();
        let (job, stats) = engine
            .run_restore(
                &principal("alice"),
                "backup-1".to_string(),
                RestoreMode::Full,
                ConflictPolicy::Skip,
                RestoreSelector::default(),
                BufReader::new(std::io::Cursor::new(buf.clone())),
                BufReader::new(std::io::Cursor::new(buf)),
                Some(len),
                len,
                "job-1",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(job.status, claudelens_core::RestoreStatus::Completed);
        assert_eq!(stats.documents_inserted, 3);
        assert!(projects.get("p1").is_some());
        assert!(sessions.get("s1").is_some());
        assert!(messages.contains("m1"));
    }

    #[tokio::test]
    async fn overwrite_policy_replaces_and_records_pre_image() {
        let (engine, projects, _sessions, _messages) = engine();
        projects.restore_put(Project::new("p1".to_string(), "alice".to_string(), "/p".to_string(), Utc::now()));
        let mut preexisting = projects.get("p1").unwrap();
        preexisting.message_count = 7;
        projects.restore_put(preexisting);

        let buf = archive_with_project_session_message("p1", "s1", "m1").await;
        let len = buf.len() as u64;
        let cancel = CancelToken::new();
        let (_job, stats) = engine
            .run_restore(
                &principal("alice"),
                "backup-2".to_string(),
                RestoreMode::Full,
                ConflictPolicy::Overwrite,
                RestoreSelector::default(),
                BufReader::new(std::io::Cursor::new(buf.clone())),
                BufReader::new(std::io::Cursor::new(buf)),
                Some(len),
                len,
                "job-2",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(stats.documents_replaced, 1);
        assert_eq!(projects.get("p1").unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn selective_mode_skips_unselected_project() {
        let (engine, projects, _sessions, _messages) = engine();
        let buf = archive_with_project_session_message("p1", "s1", "m1").await;
        let len = buf.len() as u64;
        let selector = RestoreSelector {
            project_ids: Some(vec!["other".to_string()]),
            ..Default::default()
        };
        let cancel = CancelToken::new();
        let (_job, stats) = engine
            .run_restore(
                &principal("alice"),
                "backup-3".to_string(),
                RestoreMode::Selective,
                ConflictPolicy::Skip,
                selector,
                BufReader::new(std::io::Cursor::new(buf.clone())),
                BufReader::new(std::io::Cursor::new(buf)),
                Some(len),
                len,
                "job-3",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(stats.documents_skipped, 1);
        assert!(projects.get("p1").is_none());
    }

    #[tokio::test]
    async fn cancellation_mid_apply_rolls_back_inserts() {
        let (engine, projects, _sessions, _messages) = engine();
        let buf = archive_with_project_session_message("p1", "s1", "m1").await;
        let len = buf.len() as u64;
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = engine
            .run_restore(
                &principal("alice"),
                "backup-4".to_string(),
                RestoreMode::Full,
                ConflictPolicy::Skip,
                RestoreSelector::default(),
                BufReader::new(std::io::Cursor::new(buf.clone())),
                BufReader::new(std::io::Cursor::new(buf)),
                Some(len),
                len,
                "job-4",
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled));
        assert!(projects.get("p1").is_none());
        let job = engine.job_store().all();
        assert_eq!(job[0].status, claudelens_core::RestoreStatus::Cancelled);
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_validation_before_any_apply() {
        let (engine, projects, _sessions, _messages) = engine();
        let mut buf = archive_with_project_session_message("p1", "s1", "m1").await;
        buf.truncate(buf.len() - 20);
        let len = buf.len() as u64;
        let cancel = CancelToken::new();

        let err = engine
            .run_restore(
                &principal("alice"),
                "backup-5".to_string(),
                RestoreMode::Full,
                ConflictPolicy::Skip,
                RestoreSelector::default(),
                BufReader::new(std::io::Cursor::new(buf.clone())),
                BufReader::new(std::io::Cursor::new(buf)),
                None,
                len,
                "job-5",
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Corruption { .. }));
        assert!(projects.get("p1").is_none());
    }
}
