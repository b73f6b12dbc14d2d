//! The execution backend boundary.
//!
//! The actual prediction model, alignment search, and training loop live
//! outside this process. A backend receives the job's parameters, a
//! progress reporter, and the job's cancellation token; it must observe
//! the token at safe checkpoints and return [`BackendError::Cancelled`]
//! promptly once it trips. Honouring cancellation is best-effort, not
//! instantaneous.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use foldserve_core::job::{JobKind, TrainingMetrics};
use foldserve_core::params::JobParams;
use foldserve_events::{EventBus, JobEvent, JobEventKind};
use foldserve_registry::JobRegistry;

/// Everything a backend needs to execute one job.
pub struct ExecutionContext {
    pub job_id: String,
    pub params: JobParams,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

/// What a successful execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Where the result was written (prediction file, alignment file, or
    /// training output directory).
    pub result_path: String,
}

/// Errors a backend can surface. Everything except `Cancelled` lands in
/// the job record as a `failed` terminal state.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The cancellation token tripped and the backend stopped.
    #[error("Execution was cancelled")]
    Cancelled,

    /// The backend (or a resource it needs) is not reachable or not
    /// configured.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The external program ran and failed.
    #[error("Execution failed: {0}")]
    Failed(String),

    /// Filesystem or pipe error around the external program.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The external execution collaborator.
#[async_trait]
pub trait ExecutionBackend: Send + Sync + 'static {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, BackendError>;
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Write-side handle a backend uses to report progress.
///
/// Updates the registry (where late reports against a finished job are
/// dropped) and mirrors the report onto the event bus. Cloneable and cheap;
/// only the executor hands these out, preserving the one-writer-per-job
/// discipline.
#[derive(Clone)]
pub struct ProgressReporter {
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    job_id: String,
    job_kind: JobKind,
}

impl ProgressReporter {
    pub fn new(
        registry: Arc<JobRegistry>,
        bus: Arc<EventBus>,
        job_id: impl Into<String>,
        job_kind: JobKind,
    ) -> Self {
        Self {
            registry,
            bus,
            job_id: job_id.into(),
            job_kind,
        }
    }

    /// Report fractional progress in `[0.0, 1.0]`.
    pub fn report(&self, progress: f32) {
        if let Err(e) = self.registry.update_progress(&self.job_id, progress) {
            tracing::warn!(job_id = %self.job_id, error = %e, "Dropped progress report");
            return;
        }
        self.bus.publish(JobEvent::new(
            self.job_id.clone(),
            self.job_kind,
            JobEventKind::Progress { progress },
        ));
    }

    /// Report training metrics (training jobs only).
    pub fn report_training(&self, metrics: TrainingMetrics) {
        if let Err(e) = self
            .registry
            .update_training_metrics(&self.job_id, metrics)
        {
            tracing::warn!(job_id = %self.job_id, error = %e, "Dropped metrics report");
        }
    }
}
