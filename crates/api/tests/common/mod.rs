//! Shared fixtures for the façade integration tests.
//!
//! Builds the full [`AppState`] (registry, event bus, executor) around a
//! scripted mock execution backend, so tests exercise the same submission
//! and lifecycle paths that production uses, without external programs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use foldserve_api::config::ServerConfig;
use foldserve_api::state::AppState;
use foldserve_core::job::{JobStatus, TrainingMetrics};
use foldserve_core::params::JobParams;
use foldserve_engine::{
    BackendError, ExecutionBackend, ExecutionContext, ExecutionOutcome, JobExecutor,
};
use foldserve_events::EventBus;
use foldserve_registry::JobRegistry;

/// Scripted behaviours for the mock backend.
#[allow(dead_code)] // each test binary uses a subset
pub enum MockBehavior {
    /// Report full progress, then complete with a plausible result path.
    Complete,
    /// Report training metrics, then complete.
    CompleteWithMetrics,
    /// Park until the job's cancellation token trips.
    BlockUntilCancelled,
    /// Fail with the given message.
    Fail(&'static str),
}

pub struct MockBackend {
    behavior: MockBehavior,
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutcome, BackendError> {
        match &self.behavior {
            MockBehavior::Complete => {
                ctx.progress.report(1.0);
                let result_path = match &ctx.params {
                    JobParams::Prediction(p) => format!(
                        "/cache/predictions/{}/prediction.{}",
                        ctx.job_id, p.output_format
                    ),
                    JobParams::Msa(_) => format!("/cache/msa/{}/msa.a3m", ctx.job_id),
                    JobParams::Training(p) => p.output_dir.clone(),
                };
                Ok(ExecutionOutcome { result_path })
            }
            MockBehavior::CompleteWithMetrics => {
                ctx.progress.report_training(TrainingMetrics {
                    current_epoch: 2.0,
                    train_loss: 0.41,
                    val_loss: 0.57,
                    checkpoint_path: Some("/runs/exp/epoch2.ckpt".to_string()),
                });
                let result_path = match &ctx.params {
                    JobParams::Training(p) => p.output_dir.clone(),
                    _ => format!("/cache/out/{}", ctx.job_id),
                };
                Ok(ExecutionOutcome { result_path })
            }
            MockBehavior::BlockUntilCancelled => {
                ctx.cancel.cancelled().await;
                Err(BackendError::Cancelled)
            }
            MockBehavior::Fail(message) => Err(BackendError::Failed(message.to_string())),
        }
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        inference_port: 0,
        training_port: 0,
        msa_port: 0,
        cache_dir: std::env::temp_dir().join("foldserve-tests"),
        max_concurrent_jobs: 4,
        max_sequence_length: 2000,
        shutdown_timeout_secs: 5,
        predict_command: vec!["true".to_string()],
        msa_command: vec!["true".to_string()],
        train_command: vec!["true".to_string()],
        sequence_db_path: Some(PathBuf::from("/dev/null")),
    }
}

/// Build the full application state around the given mock behaviour.
///
/// This mirrors the wiring in `main.rs` (registry, event bus, executor)
/// so the façades are exercised exactly as production wires them.
pub fn build_state(behavior: MockBehavior) -> AppState {
    let registry = Arc::new(JobRegistry::new());
    let event_bus = Arc::new(EventBus::default());
    let backend = Arc::new(MockBackend { behavior });
    let executor = JobExecutor::new(
        Arc::clone(&registry),
        Arc::clone(&event_bus),
        backend,
        4,
    );

    AppState {
        registry,
        executor,
        event_bus,
        config: Arc::new(test_config()),
    }
}

/// Poll the registry until the job reaches a terminal state.
#[allow(dead_code)]
pub async fn wait_terminal(state: &AppState, job_id: &str) -> JobStatus {
    for _ in 0..500 {
        let status = state.registry.get(job_id).unwrap().status;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal state");
}
