//! Bounded job executor.
//!
//! One long-lived executor drives every accepted job through its
//! lifecycle. Submission never blocks on execution: [`JobExecutor::dispatch`]
//! spawns a supervised task per job, which waits for one of the
//! `max_concurrent_jobs` permits (the job stays `Pending`), marks the job
//! `Running`, runs the backend, and records exactly one terminal state in
//! the registry. Backend errors and worker panics land in the job record,
//! never at a caller.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use foldserve_core::job::Job;
use foldserve_events::{EventBus, JobEvent, JobEventKind};
use foldserve_registry::JobRegistry;

use crate::backend::{BackendError, ExecutionBackend, ExecutionContext, ProgressReporter};

/// Drives accepted jobs to a terminal state on the execution backend.
///
/// Created once at application startup; the returned `Arc` is cheaply
/// cloneable into the service façades.
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    backend: Arc<dyn ExecutionBackend>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Tripped at shutdown; every in-flight job observes it.
    shutdown: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        bus: Arc<EventBus>,
        backend: Arc<dyn ExecutionBackend>,
        max_concurrent_jobs: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            backend,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Hand a freshly created (`Pending`) job to the execution pool and
    /// return immediately.
    pub fn dispatch(&self, job_id: String) {
        let registry = Arc::clone(&self.registry);
        let bus = Arc::clone(&self.bus);
        let backend = Arc::clone(&self.backend);
        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown.clone();

        self.tracker.spawn(async move {
            run_job(registry, bus, backend, permits, shutdown, job_id).await;
        });
    }

    /// Gracefully stop: request cancellation of all in-flight jobs and wait
    /// up to `drain` for their tasks to finish recording terminal states.
    pub async fn shutdown(&self, drain: Duration) {
        tracing::info!("Shutting down job executor");
        self.shutdown.cancel();
        self.tracker.close();

        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            tracing::warn!("Timed out waiting for in-flight jobs to stop");
        } else {
            tracing::info!("Job executor drained");
        }
    }
}

/// Supervise a single job from permit wait to terminal state.
async fn run_job(
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    backend: Arc<dyn ExecutionBackend>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    job_id: String,
) {
    let job_cancel = match registry.cancellation_token(&job_id) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Dispatched job vanished from registry");
            return;
        }
    };

    // Wait for an execution slot. The job stays Pending; a cancellation or
    // an executor shutdown during the wait means the backend is never
    // invoked.
    let _permit = tokio::select! {
        _ = job_cancel.cancelled() => {
            // The registry already recorded the terminal state.
            publish_for(&registry, &bus, &job_id, JobEventKind::Cancelled);
            return;
        }
        _ = shutdown.cancelled() => {
            let _ = registry.cancel(&job_id);
            publish_for(&registry, &bus, &job_id, JobEventKind::Cancelled);
            return;
        }
        permit = permits.clone().acquire_owned() => {
            permit.expect("executor semaphore closed")
        }
    };

    let job = match start_job(&registry, &job_id) {
        Some(job) => job,
        None => return,
    };

    tracing::info!(job_id = %job_id, kind = %job.kind, "Job started on backend");
    bus.publish(JobEvent::new(job_id.clone(), job.kind, JobEventKind::Started));

    let ctx = ExecutionContext {
        job_id: job_id.clone(),
        params: job.params.clone(),
        progress: ProgressReporter::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            job_id.clone(),
            job.kind,
        ),
        cancel: job_cancel.clone(),
    };

    let execution = AssertUnwindSafe(backend.execute(ctx)).catch_unwind();
    let result = tokio::select! {
        _ = shutdown.cancelled() => {
            job_cancel.cancel();
            Err(BackendError::Cancelled)
        }
        outcome = execution => match outcome {
            Ok(result) => result,
            Err(_) => Err(BackendError::Failed(
                "worker panicked during execution".to_string(),
            )),
        },
    };

    match result {
        Ok(outcome) => match registry.complete(&job_id, outcome.result_path.clone()) {
            Ok(()) => {
                tracing::info!(job_id = %job_id, result_path = %outcome.result_path, "Job completed");
                bus.publish(JobEvent::new(
                    job_id,
                    job.kind,
                    JobEventKind::Completed {
                        result_path: outcome.result_path,
                    },
                ));
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to record job completion");
            }
        },
        Err(BackendError::Cancelled) => match registry.mark_cancelled(&job_id) {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Job cancelled");
                bus.publish(JobEvent::new(job_id, job.kind, JobEventKind::Cancelled));
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Cancellation raced a terminal state");
            }
        },
        Err(e) => {
            let message = e.to_string();
            match registry.fail(&job_id, message.clone()) {
                Ok(()) => {
                    tracing::warn!(job_id = %job_id, error = %message, "Job failed");
                    bus.publish(JobEvent::new(
                        job_id,
                        job.kind,
                        JobEventKind::Failed {
                            error_message: message,
                        },
                    ));
                }
                Err(record_err) => {
                    tracing::debug!(job_id = %job_id, error = %record_err, "Failure raced a terminal state");
                }
            }
        }
    }
}

/// Move the job to `Running` and fetch its record; `None` when a
/// cancellation won the race.
fn start_job(registry: &JobRegistry, job_id: &str) -> Option<Job> {
    if let Err(e) = registry.mark_running(job_id) {
        tracing::debug!(job_id = %job_id, error = %e, "Job not started (cancelled before dispatch)");
        return None;
    }
    match registry.get(job_id) {
        Ok(job) => Some(job),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Running job vanished from registry");
            None
        }
    }
}

/// Publish an event, looking the kind up from the registry.
fn publish_for(registry: &JobRegistry, bus: &EventBus, job_id: &str, event: JobEventKind) {
    if let Ok(job) = registry.get(job_id) {
        bus.publish(JobEvent::new(job_id.to_string(), job.kind, event));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
