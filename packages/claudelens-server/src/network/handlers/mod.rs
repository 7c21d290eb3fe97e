//! HTTP handler definitions for the thin network boundary.
//!
//! Defines `AppState` (the shared state carried through axum extractors)
//! and re-exports all handler functions for convenient access when
//! building the router.

pub mod health;
pub mod jobs;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use jobs::{job_status_handler, job_stream_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::SharedBroadcaster;
use crate::jobs::JobRegistry;

use super::{NetworkConfig, ShutdownController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Network configuration (bind address, CORS, timeouts).
    pub config: Arc<NetworkConfig>,
    /// Registry of background job records (ingest/backup/restore).
    pub jobs: Arc<JobRegistry>,
    /// Progress event pub/sub, subscribed to by the job-status stream.
    pub broadcaster: SharedBroadcaster,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
