//! Server-Sent Events stream, project root watcher and job event forwarding.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use builder::core::types::{JobId, JobStatus};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SsePayload<'a> {
    #[serde(rename_all = "camelCase")]
    JobUpdated { job_id: &'a JobId, status: JobStatus },
    ArtifactsChanged,
}

impl<'a> From<&'a ChangeEvent> for SsePayload<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        match event {
            ChangeEvent::JobUpdated { job_id, status } => SsePayload::JobUpdated {
                job_id,
                status: *status,
            },
            ChangeEvent::ArtifactsChanged => SsePayload::ArtifactsChanged,
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    match serde_json::to_string(&SsePayload::from(&change_event)) {
                        Ok(json) => yield Ok(Event::default().event("change").data(json)),
                        Err(err) => warn!(err = %err, "failed to encode SSE payload"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Forward runner job events to SSE clients.
pub fn start_job_forwarder(state: AppState) {
    let mut jobs = state.runner.subscribe();
    tokio::spawn(async move {
        loop {
            match jobs.recv().await {
                Ok(event) => {
                    debug!(job_id = %event.job_id, status = %event.status, "broadcasting job update");
                    let _ = state.event_tx.send(ChangeEvent::JobUpdated {
                        job_id: event.job_id,
                        status: event.status,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "job event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Start the project root watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;

    let root = state.artifacts.root().to_path_buf();
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(path = %root.display(), "watching project root");

    // Generators write many files in a burst; flush at a fixed interval so one
    // burst becomes one notification.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events);
                pending_events.clear();
            }
        }
    }
}

fn process_events(state: &AppState, events: &[NotifyEvent]) {
    if artifacts_touched(events) {
        debug!("broadcasting artifacts change");
        let _ = state.event_tx.send(ChangeEvent::ArtifactsChanged);
    }
}

fn artifacts_touched(events: &[NotifyEvent]) -> bool {
    events.iter().any(|event| {
        matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        )
    })
}
