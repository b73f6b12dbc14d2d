//! Structured-log mirror for job lifecycle events.
//!
//! Subscribes to the [`EventBus`](crate::bus::EventBus) broadcast channel
//! and emits one tracing event per lifecycle edge, so operators can follow
//! job execution without polling the services. Runs as a long-lived
//! background task and shuts down when the bus sender is dropped.

use tokio::sync::broadcast;

use crate::bus::{JobEvent, JobEventKind};

/// Run the mirror loop until the event bus is closed.
pub async fn run_log_mirror(mut receiver: broadcast::Receiver<JobEvent>) {
    loop {
        match receiver.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event log mirror lagged, some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, log mirror shutting down");
                break;
            }
        }
    }
}

fn log_event(event: &JobEvent) {
    let job_id = event.job_id.as_str();
    let kind = event.job_kind.as_str();

    match &event.event {
        JobEventKind::Started => {
            tracing::info!(job_id, kind, "Job started");
        }
        JobEventKind::Progress { progress } => {
            tracing::debug!(job_id, kind, progress, "Job progress");
        }
        JobEventKind::Completed { result_path } => {
            tracing::info!(job_id, kind, result_path = %result_path, "Job completed");
        }
        JobEventKind::Failed { error_message } => {
            tracing::warn!(job_id, kind, error = %error_message, "Job failed");
        }
        JobEventKind::Cancelled => {
            tracing::info!(job_id, kind, "Job cancelled");
        }
    }
}
