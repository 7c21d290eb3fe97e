//! Server configuration, loaded from CLI flags and environment variables.
//!
//! Shaped the way `service::config::ServerConfig` and
//! `network::config::NetworkConfig` are in the teacher: a plain struct with
//! a `Default` impl, held behind `Arc` once constructed and never mutated.
//! Env keys follow spec §6.

use std::time::Duration;

use clap::Parser;

/// Top-level server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "claudelens-server", version, about)]
pub struct AppConfig {
    /// Bind address for the HTTP listener.
    #[arg(long, env = "CLAUDELENS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "CLAUDELENS_PORT", default_value_t = 0)]
    pub port: u16,

    /// Connection string for the persistent store.
    #[arg(long, env = "DATABASE_URL", default_value = "")]
    pub database_url: String,

    /// Secret used to sign and verify bearer tokens.
    #[arg(long, env = "TOKEN_SIGNING_SECRET", default_value = "")]
    pub token_signing_secret: String,

    /// Development convenience: map loopback-origin requests with no
    /// credentials to a default administrative principal. See the Open
    /// Question on loopback-admin fallback — defaults to `false` so a
    /// production build must opt in explicitly.
    #[arg(long, env = "DEFAULT_ADMIN_ON_LOOPBACK", default_value_t = false)]
    pub default_admin_on_loopback: bool,

    /// Default zstd compression level used by the Backup Engine (§4.7).
    #[arg(long, env = "COMPRESSION_LEVEL_DEFAULT", default_value_t = 6)]
    pub compression_level_default: i32,

    /// Rate-limit window size in hours, used when a limit descriptor omits one.
    #[arg(long, env = "RATE_LIMIT_WINDOW_HOURS", default_value_t = 1)]
    pub rate_limit_window_hours: u64,

    /// Retention, in days, for rate-limit accounting rollups (§4.6).
    #[arg(long, env = "RATE_LIMIT_RETENTION_DAYS", default_value_t = 30)]
    pub rate_limit_retention_days: u64,

    /// Retention, in hours, for temp upload/export files (§4.10).
    #[arg(long, env = "TEMP_FILE_RETENTION_HOURS", default_value_t = 24)]
    pub temp_file_retention_hours: u64,

    /// Maximum accepted upload size, in megabytes.
    #[arg(long, env = "MAX_UPLOAD_SIZE_MB", default_value_t = 512)]
    pub max_upload_size_mb: u64,

    /// Maximum number of records accepted in a single ingest batch (§4.4).
    #[arg(long, env = "MAX_INGEST_BATCH_SIZE", default_value_t = 1000)]
    pub max_ingest_batch_size: usize,

    /// Maximum number of concurrent long-running jobs (ingest/backup/restore)
    /// before the load-shed middleware rejects new ones.
    #[arg(long, env = "MAX_CONCURRENT_JOBS", default_value_t = 64)]
    pub max_concurrent_jobs: u32,
}

impl AppConfig {
    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_hours * 3600)
    }

    #[must_use]
    pub fn rate_limit_retention(&self) -> Duration {
        Duration::from_secs(self.rate_limit_retention_days * 86_400)
    }

    #[must_use]
    pub fn temp_file_retention(&self) -> Duration {
        Duration::from_secs(self.temp_file_retention_hours * 3600)
    }

    #[must_use]
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1_048_576
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            database_url: String::new(),
            token_signing_secret: String::new(),
            default_admin_on_loopback: false,
            compression_level_default: 6,
            rate_limit_window_hours: 1,
            rate_limit_retention_days: 30,
            temp_file_retention_hours: 24,
            max_upload_size_mb: 512,
            max_ingest_batch_size: 1000,
            max_concurrent_jobs: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_limits() {
        let config = AppConfig::default();
        assert_eq!(config.max_ingest_batch_size, 1000);
        assert!(!config.default_admin_on_loopback);
    }

    #[test]
    fn derived_durations_are_consistent() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit_retention(), Duration::from_secs(30 * 86_400));
        assert_eq!(config.max_upload_size_bytes(), 512 * 1_048_576);
    }
}
