//! Networking types, configuration, and shutdown control for the thin
//! HTTP boundary (health, readiness, job-status) described in SPEC_FULL
//! §C. The ingestion/search/backup/restore HTTP surface is an external
//! collaborator per spec §1 and is not implemented here.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::*;
