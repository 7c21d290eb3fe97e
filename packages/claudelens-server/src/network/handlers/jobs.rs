//! Job-status endpoints (§6 job polling, §4.9 progress stream): the only
//! two routes the thin network boundary exposes beyond health/readiness.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use tokio::sync::mpsc;

use super::AppState;
use crate::broadcast::ProgressEvent;

/// `GET /jobs/:id` -- current `JobRecord` snapshot, or 404.
pub async fn job_status_handler(State(state): State<AppState>, Path(job_id): Path<String>) -> impl IntoResponse {
    match state.jobs.get(&job_id) {
        Some(record) => Json(record).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Wraps a bounded `mpsc::Receiver` as a `Stream` for SSE framing, without
/// pulling in a separate channel-to-stream adapter crate.
struct ReceiverStream {
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl Stream for ReceiverStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// `GET /jobs/:id/stream` -- Server-Sent Events of `ProgressEvent`s for one
/// job, backed by [`crate::broadcast::ProgressBroadcaster::subscribe`]
/// (§4.9).
pub async fn job_stream_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe(&job_id);
    let stream = ReceiverStream {
        receiver: subscription.receiver,
    };
    let events = futures_util::StreamExt::map(stream, |event| {
        Ok(Event::default().json_data(event).unwrap_or_else(|_| Event::default().data("serialization error")))
    });
    Sse::new(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ProgressBroadcaster;
    use crate::jobs::{JobKind, JobRegistry};
    use crate::network::{NetworkConfig, ShutdownController};
    use std::sync::Arc;
    use std::time::Instant;

    fn test_state() -> AppState {
        AppState {
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            jobs: Arc::new(JobRegistry::new()),
            broadcaster: Arc::new(ProgressBroadcaster::new()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn job_status_returns_404_for_unknown_id() {
        let state = test_state();
        let response = job_status_handler(State(state), Path("missing".to_string())).await;
        assert_eq!(response.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn job_status_returns_record_for_known_id() {
        let state = test_state();
        let (id, _token) = state.jobs.create(JobKind::Backup, chrono::Utc::now());
        let response = job_status_handler(State(state), Path(id)).await;
        assert_eq!(response.into_response().status(), StatusCode::OK);
    }
}
