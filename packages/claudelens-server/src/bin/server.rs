//! claudelens server entry point.
//!
//! Wires the data plane (project/session/message stores), the service
//! components built on top of it (ingestion, cost, rate-limit, backup,
//! restore, search), the background scheduler, and the thin HTTP boundary
//! together, then runs until a shutdown signal arrives. Everything beyond
//! the thin health/readiness/job-status surface -- the ingestion/search/
//! backup/restore HTTP surface -- is an external collaborator per spec §1;
//! this binary assembles the components those collaborators would call
//! into as a library, and serves only the boundary this crate owns.

use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use claudelens_server::backup::{BackupEngine, BackupMetadataStore};
use claudelens_server::broadcast::ProgressBroadcaster;
use claudelens_server::config::AppConfig;
use claudelens_server::cost::PricingTable;
use claudelens_server::ingest::IngestionPipeline;
use claudelens_server::jobs::JobRegistry;
use claudelens_server::network::{NetworkConfig, NetworkModule};
use claudelens_server::ownership::OwnershipResolver;
use claudelens_server::rate_limit::{RateLimitEngine, RateLimitSettings};
use claudelens_server::restore::{RestoreEngine, RestoreJobStore};
use claudelens_server::scheduler::BackgroundScheduler;
use claudelens_server::search::SearchAdapter;
use claudelens_server::storage::{MessageStore, ProjectStore, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AppConfig::parse();

    // Installs the process-wide metrics recorder and its own HTTP listener
    // (§A.4); counters and histograms recorded anywhere in this binary
    // (ingestion throughput, rate-limit denials, backup/restore byte
    // counters) are scraped from there rather than through the thin
    // boundary's own router.
    if let Err(err) = PrometheusBuilder::new().install() {
        error!(error = %err, "failed to install the metrics recorder, continuing without one");
    }

    let projects = Arc::new(ProjectStore::new());
    let sessions = Arc::new(SessionStore::new());
    let messages = Arc::new(MessageStore::new());
    let ownership = Arc::new(OwnershipResolver::new(Arc::clone(&projects), Arc::clone(&sessions)));

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let jobs = Arc::new(JobRegistry::new());

    let pricing = Arc::new(PricingTable::new(std::env::var("PRICING_TABLE_URL").unwrap_or_default()));
    pricing.refresh().await;

    let ingestion = Arc::new(IngestionPipeline::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&pricing),
        Arc::clone(&broadcaster),
        config.max_ingest_batch_size,
    ));

    let rate_limit = Arc::new(RateLimitEngine::new(RateLimitSettings::default(), config.rate_limit_retention()));

    let backup_metadata = Arc::new(BackupMetadataStore::new());
    let backup = Arc::new(BackupEngine::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&ownership),
        Arc::clone(&backup_metadata),
        Arc::clone(&broadcaster),
    ));

    let restore_jobs = Arc::new(RestoreJobStore::new());
    let restore = Arc::new(RestoreEngine::new(
        Arc::clone(&projects),
        Arc::clone(&sessions),
        Arc::clone(&messages),
        Arc::clone(&restore_jobs),
        Arc::clone(&broadcaster),
    ));

    let _search = Arc::new(SearchAdapter::new()?);

    // `ingestion`, `backup`, `restore`, and `_search` are not reachable
    // through the thin HTTP boundary this binary serves (§1: the
    // ingestion/search/backup/restore HTTP surface is an external
    // collaborator); they're assembled here so that collaborator has a
    // fully wired set of components to call into as a library.
    let _ = (&ingestion, &backup, &restore);

    let scheduler = Arc::new(BackgroundScheduler::new(
        Arc::clone(&rate_limit),
        Arc::clone(&messages),
        std::env::temp_dir().join("claudelens"),
        config.temp_file_retention(),
    ));

    let mut network = NetworkModule::new(
        NetworkConfig {
            host: config.host.clone(),
            port: config.port,
            ..NetworkConfig::default()
        },
        Arc::clone(&jobs),
        Arc::clone(&broadcaster),
    );
    let shutdown_controller = network.shutdown_controller();
    let port = network.start().await?;
    info!(port, "claudelens server listening");

    let scheduler_shutdown = shutdown_controller.shutdown_receiver();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let serve_result = network
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    if let Err(err) = scheduler_handle.await {
        error!(error = %err, "background scheduler task panicked");
    }

    serve_result
}
