//! The Background Scheduler (§4.10): periodic maintenance tasks that run
//! for the lifetime of the process, each on its own interval, each
//! independently retried with bounded backoff on failure.
//!
//! Grounded on the teacher's `ShutdownController`/`watch::Receiver` shutdown
//! idiom (`network::shutdown`): every task selects between its own ticker
//! and the shared shutdown signal so the whole scheduler winds down
//! together with the server rather than outliving it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::rate_limit::RateLimitEngine;
use crate::storage::MessageStore;

/// Usage rollups flush to durable storage every 60 seconds (§4.6 Accounting).
const USAGE_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
/// Rate-limit accounting rollups are pruned once a day (§4.6).
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(86_400);
/// Empty month partitions are dropped once a day (§4.3 Drop-empty).
const PARTITION_GC_INTERVAL: Duration = Duration::from_secs(86_400);
/// Temp upload/export files are swept hourly (§4.10).
const TEMP_FILE_GC_INTERVAL: Duration = Duration::from_secs(3600);

/// Initial backoff after a task iteration fails; doubles up to a ceiling so
/// a persistently broken task doesn't spin (§4.10 "bounded backoff retry").
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(300);

/// Runs a single periodic task until `shutdown` fires, applying bounded
/// exponential backoff between a failed iteration and the next tick.
async fn run_periodic<F, Fut>(name: &'static str, period: Duration, shutdown: &mut watch::Receiver<bool>, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = BACKOFF_INITIAL;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match task().await {
                    Ok(()) => backoff = BACKOFF_INITIAL,
                    Err(err) => {
                        warn!(task = name, error = %err, backoff_secs = backoff.as_secs(), "scheduled task failed, retrying after backoff");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CEILING);
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(task = name, "scheduler task stopping on shutdown signal");
                    return;
                }
            }
        }
    }
}

/// Owns the store handles the maintenance tasks act on. Holds no state of
/// its own beyond configuration; every task operates through `Arc` handles
/// shared with the rest of the server.
pub struct BackgroundScheduler {
    rate_limit: Arc<RateLimitEngine>,
    messages: Arc<MessageStore>,
    temp_dir: PathBuf,
    temp_file_retention: Duration,
}

impl BackgroundScheduler {
    #[must_use]
    pub fn new(
        rate_limit: Arc<RateLimitEngine>,
        messages: Arc<MessageStore>,
        temp_dir: PathBuf,
        temp_file_retention: Duration,
    ) -> Self {
        Self {
            rate_limit,
            messages,
            temp_dir,
            temp_file_retention,
        }
    }

    /// Runs every maintenance task concurrently until `shutdown` fires.
    /// A single task's own failures never stop the others, or the process
    /// (§4.10 "never terminates the process") -- only the shutdown signal
    /// ends this future.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!("background scheduler starting");

        let usage_flush = {
            let this = Arc::clone(&self);
            let mut rx = shutdown.clone();
            async move {
                run_periodic("usage_flush", USAGE_FLUSH_INTERVAL, &mut rx, || async {
                    this.rate_limit.accounting().flush();
                    Ok(())
                })
                .await;
            }
        };

        let rate_limit_prune = {
            let this = Arc::clone(&self);
            let mut rx = shutdown.clone();
            async move {
                run_periodic("rate_limit_prune", RATE_LIMIT_PRUNE_INTERVAL, &mut rx, || async {
                    this.rate_limit.accounting().prune_expired(Utc::now());
                    Ok(())
                })
                .await;
            }
        };

        let partition_gc = {
            let this = Arc::clone(&self);
            let mut rx = shutdown.clone();
            async move {
                run_periodic("partition_gc", PARTITION_GC_INTERVAL, &mut rx, || async {
                    this.messages.drop_empty_partitions();
                    Ok(())
                })
                .await;
            }
        };

        let temp_file_gc = {
            let this = Arc::clone(&self);
            let mut rx = shutdown.clone();
            async move {
                run_periodic("temp_file_gc", TEMP_FILE_GC_INTERVAL, &mut rx, || this.sweep_temp_dir()).await;
            }
        };

        tokio::join!(usage_flush, rate_limit_prune, partition_gc, temp_file_gc);
        info!("background scheduler stopped");
    }

    /// Removes files under `temp_dir` older than `temp_file_retention`
    /// (§4.10 Temp-file GC). Missing directories are not an error -- a
    /// fresh deployment may not have produced any temp files yet.
    async fn sweep_temp_dir(&self) -> anyhow::Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let cutoff = std::time::SystemTime::now() - self.temp_file_retention;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if modified < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}
