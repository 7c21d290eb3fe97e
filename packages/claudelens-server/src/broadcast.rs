//! The Progress Broadcaster (§4.9): a process-local pub/sub keyed by
//! `job_id`, plus a global "all jobs" topic. Grounded on the teacher's
//! connection-registry idea of a concurrent map of bounded outbound
//! channels, generalized from WebSocket frames to JSON progress events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Per-subscriber outbound queue capacity. A slow subscriber falls behind
/// and has events dropped rather than blocking the publisher (§4.9).
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Topic name for the "all jobs" broadcast (§4.9).
pub const ALL_JOBS_TOPIC: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Progress,
    Completed,
    Failed,
    Cancelled,
}

/// One progress event: `{type, job_id, progress, current, total, message,
/// completed, timestamp}` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub job_id: String,
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub progress: f64,
    pub message: String,
    pub completed: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    #[must_use]
    pub fn progress(job_id: &str, stage: &str, current: u64, total: u64) -> Self {
        let progress = if total == 0 {
            1.0
        } else {
            current as f64 / total as f64
        };
        Self {
            event_type: ProgressEventType::Progress,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            current,
            total,
            progress,
            message: format!("{current}/{total}"),
            completed: false,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn completed(job_id: &str, stage: &str, message: &str) -> Self {
        Self {
            event_type: ProgressEventType::Completed,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            current: 1,
            total: 1,
            progress: 1.0,
            message: message.to_string(),
            completed: true,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(job_id: &str, stage: &str, message: &str) -> Self {
        Self {
            event_type: ProgressEventType::Failed,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            current: 0,
            total: 0,
            progress: 0.0,
            message: message.to_string(),
            completed: true,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn cancelled(job_id: &str, stage: &str) -> Self {
        Self {
            event_type: ProgressEventType::Cancelled,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            current: 0,
            total: 0,
            progress: 0.0,
            message: "cancelled".to_string(),
            completed: true,
            timestamp: Utc::now(),
        }
    }
}

/// A live subscription handle. Dropping it unsubscribes.
pub struct Subscription {
    pub receiver: mpsc::Receiver<ProgressEvent>,
}

/// Process-local pub/sub for job progress (§4.9).
///
/// Each `job_id` topic and the `ALL_JOBS_TOPIC` topic hold an independent
/// set of bounded subscriber queues. Publishing never blocks: a full
/// queue silently drops the event for that one subscriber (`try_send`),
/// matching "a slow subscriber MUST NOT block a publisher".
pub struct ProgressBroadcaster {
    topics: DashMap<String, Vec<mpsc::Sender<ProgressEvent>>>,
}

impl ProgressBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Subscribes to one job's topic. Also receives on the "all jobs"
    /// topic by subscribing separately via [`Self::subscribe_all`].
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        self.subscribe_topic(job_id)
    }

    /// Subscribes to every job's events.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe_topic(ALL_JOBS_TOPIC)
    }

    fn subscribe_topic(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Subscription { receiver: rx }
    }

    /// Publishes an event to the job's topic and the "all jobs" topic.
    /// Disconnected subscribers (receiver dropped) are pruned lazily on
    /// the next publish to that topic.
    pub fn publish(&self, job_id: &str, event: ProgressEvent) {
        self.publish_to_topic(job_id, &event);
        if job_id != ALL_JOBS_TOPIC {
            self.publish_to_topic(ALL_JOBS_TOPIC, &event);
        }
    }

    fn publish_to_topic(&self, topic: &str, event: &ProgressEvent) {
        let Some(mut subscribers) = self.topics.get_mut(topic) else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of live subscribers on a topic, for tests and diagnostics.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedBroadcaster = Arc<ProgressBroadcaster>;
