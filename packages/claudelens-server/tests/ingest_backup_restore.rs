//! Cross-component integration test: ingest -> store -> backup -> restore.
//!
//! Unlike the inline `#[cfg(test)]` modules beside each component (which
//! exercise one component's contract against direct store access), this
//! wires the real pipeline end to end the way a caller outside this crate
//! would: ingest records through `IngestionPipeline`, stream them into a
//! `.claudelens` archive through `BackupEngine`, wipe the stores, and bring
//! everything back through `RestoreEngine`.

use std::sync::Arc;

use chrono::Utc;
use claudelens_core::{AuthMethod, ContentPayload, ConflictPolicy, MessageType, Principal, Role, RestoreMode};
use tokio::io::BufReader;

use claudelens_server::backup::{BackupEngine, BackupFilter, BackupMetadataStore, BackupType};
use claudelens_server::broadcast::ProgressBroadcaster;
use claudelens_server::cost::PricingTable;
use claudelens_server::ingest::{IngestRecord, IngestRequest, IngestionPipeline};
use claudelens_server::jobs::CancelToken;
use claudelens_server::ownership::OwnershipResolver;
use claudelens_server::restore::{RestoreEngine, RestoreJobStore, RestoreSelector};
use claudelens_server::storage::{MessageStore, ProjectStore, SessionStore};

fn principal(user_id: &str) -> Principal {
    Principal {
        user_id: user_id.to_string(),
        role: Role::User,
        permissions: vec![],
        api_key_label: None,
        auth_method: AuthMethod::ApiKey,
    }
}

fn record(uuid: &str, session_id: &str) -> IngestRecord {
    IngestRecord {
        uuid: uuid.to_string(),
        session_id: session_id.to_string(),
        parent_uuid: None,
        message_type: MessageType::User,
        content: Some(ContentPayload::Text(format!("message {uuid}"))),
        timestamp: Utc::now(),
        cost: None,
        model: None,
        usage: None,
        latency_ms: None,
        git_branch: None,
        cwd: "/proj/x".to_string(),
    }
}

#[tokio::test]
async fn full_round_trip_restores_every_message_into_a_fresh_store() {
    let projects = Arc::new(ProjectStore::new());
    let sessions = Arc::new(SessionStore::new());
    let messages = Arc::new(MessageStore::new());
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let pricing = Arc::new(PricingTable::new("http://example.invalid/pricing.json"));

    let ingestion = IngestionPipeline::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&pricing),
        Arc::clone(&broadcaster),
        1000,
    );

    let alice = principal("alice");
    let request = IngestRequest {
        records: (0..25).map(|i| record(&format!("m{i}"), "s1")).collect(),
        overwrite_mode: false,
    };
    let stats = ingestion.ingest(&alice, request, "ingest-job").await.unwrap();
    assert_eq!(stats.inserted, 25);
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(
        messages
            .count_in_range(None, Utc::now() - chrono::Duration::days(1), Utc::now() + chrono::Duration::days(1))
            .await,
        25
    );

    let ownership = Arc::new(OwnershipResolver::new(Arc::clone(&projects), Arc::clone(&sessions)));
    let backup_metadata = Arc::new(BackupMetadataStore::new());
    let backup = BackupEngine::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&ownership),
        Arc::clone(&backup_metadata),
        Arc::clone(&broadcaster),
    );

    let mut archive_bytes = Vec::new();
    let cancel = CancelToken::new();
    let backup_metadata_record = backup
        .run_backup(
            &alice,
            BackupType::Full,
            BackupFilter::default(),
            "integration-test".to_string(),
            "/tmp/integration-test.claudelens".to_string(),
            3,
            None,
            &mut archive_bytes,
            "backup-job",
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(backup_metadata_record.content_counts.get("messages"), Some(&25));

    // Fresh stores: the restore below must recreate everything from the
    // archive alone, with no leftover state from the ingest above.
    let restore_projects = Arc::new(ProjectStore::new());
    let restore_sessions = Arc::new(SessionStore::new());
    let restore_messages = Arc::new(MessageStore::new());
    let restore_jobs = Arc::new(RestoreJobStore::new());
    let restore = RestoreEngine::new(
        Arc::clone(&restore_projects),
        Arc::clone(&restore_sessions),
        Arc::clone(&restore_messages),
        Arc::clone(&restore_jobs),
        Arc::clone(&broadcaster),
    );

    let archive_len = archive_bytes.len() as u64;
    let restore_cancel = CancelToken::new();
    let (job, restore_stats) = restore
        .run_restore(
            &alice,
            backup_metadata_record.id.clone(),
            RestoreMode::Full,
            ConflictPolicy::Skip,
            RestoreSelector::default(),
            BufReader::new(std::io::Cursor::new(archive_bytes.clone())),
            BufReader::new(std::io::Cursor::new(archive_bytes)),
            Some(archive_len),
            archive_len,
            "restore-job",
            &restore_cancel,
        )
        .await
        .unwrap();

    assert_eq!(job.status, claudelens_core::RestoreStatus::Completed);
    assert_eq!(restore_stats.documents_inserted, 1 /* project */ + 1 /* session */ + 25 /* messages */);
    assert_eq!(restore_projects.all_ids().len(), 1);
    assert_eq!(restore_sessions.all_ids().len(), 1);
    assert_eq!(
        restore_messages
            .count_in_range(None, Utc::now() - chrono::Duration::days(1), Utc::now() + chrono::Duration::days(1))
            .await,
        25
    );
}

#[tokio::test]
async fn checksum_mismatch_leaves_the_restore_target_untouched() {
    let projects = Arc::new(ProjectStore::new());
    let sessions = Arc::new(SessionStore::new());
    let messages = Arc::new(MessageStore::new());
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let pricing = Arc::new(PricingTable::new("http://example.invalid/pricing.json"));

    let ingestion = IngestionPipeline::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&pricing),
        Arc::clone(&broadcaster),
        1000,
    );
    let alice = principal("alice");
    ingestion
        .ingest(
            &alice,
            IngestRequest {
                records: vec![record("m0", "s1")],
                overwrite_mode: false,
            },
            "ingest-job",
        )
        .await
        .unwrap();

    let ownership = Arc::new(OwnershipResolver::new(Arc::clone(&projects), Arc::clone(&sessions)));
    let backup_metadata = Arc::new(BackupMetadataStore::new());
    let backup = BackupEngine::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&ownership),
        Arc::clone(&backup_metadata),
        Arc::clone(&broadcaster),
    );
    let mut archive_bytes = Vec::new();
    backup
        .run_backup(
            &alice,
            BackupType::Full,
            BackupFilter::default(),
            "corrupt-me".to_string(),
            "/tmp/corrupt-me.claudelens".to_string(),
            3,
            None,
            &mut archive_bytes,
            "backup-job",
            &CancelToken::new(),
        )
        .await
        .unwrap();

    // Flip a byte in the compressed stream so the stored checksum no
    // longer matches what the validation pass recomputes.
    let flip_at = archive_bytes.len() / 2;
    archive_bytes[flip_at] ^= 0xFF;

    let restore_projects = Arc::new(ProjectStore::new());
    let restore_sessions = Arc::new(SessionStore::new());
    let restore_messages = Arc::new(MessageStore::new());
    let restore_jobs = Arc::new(RestoreJobStore::new());
    let restore = RestoreEngine::new(
        Arc::clone(&restore_projects),
        Arc::clone(&restore_sessions),
        Arc::clone(&restore_messages),
        Arc::clone(&restore_jobs),
        Arc::clone(&broadcaster),
    );

    let archive_len = archive_bytes.len() as u64;
    let result = restore
        .run_restore(
            &alice,
            "backup-1".to_string(),
            RestoreMode::Full,
            ConflictPolicy::Skip,
            RestoreSelector::default(),
            BufReader::new(std::io::Cursor::new(archive_bytes.clone())),
            BufReader::new(std::io::Cursor::new(archive_bytes)),
            Some(archive_len),
            archive_len,
            "restore-job",
            &CancelToken::new(),
        )
        .await;

    assert!(result.is_err());
    assert!(restore_projects.all_ids().is_empty());
    assert!(restore_sessions.all_ids().is_empty());
}
