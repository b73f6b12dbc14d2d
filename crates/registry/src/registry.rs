//! In-memory job store with per-entry locking and state machine
//! enforcement.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use foldserve_core::job::{Job, JobStatus, TrainingMetrics};
use foldserve_core::params::JobParams;
use foldserve_core::CoreError;

/// Fallback error text for failed jobs reported without a message.
const UNSPECIFIED_FAILURE: &str = "job failed without an error message";

/// One registry entry: the record plus the token the executor watches for
/// cooperative cancellation.
struct JobEntry {
    job: Job,
    cancel: CancellationToken,
}

/// Map from job id to individually locked job entries.
///
/// All mutation goes through the entry's own mutex; the outer `RwLock`
/// guards only map membership. Writers hold exactly one entry lock at a
/// time, never the map write lock simultaneously with an entry lock.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Mutex<JobEntry>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a fresh `Pending` job and return its id.
    ///
    /// An empty `requested_id` means the caller wants a server-generated
    /// UUID. A non-empty id that is already taken is rejected with
    /// `AlreadyExists` rather than silently replacing the existing job.
    pub fn create(
        &self,
        params: JobParams,
        requested_id: Option<String>,
    ) -> Result<String, CoreError> {
        let job_id = match requested_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut jobs = self.jobs.write().expect("job map lock poisoned");
        if jobs.contains_key(&job_id) {
            return Err(CoreError::AlreadyExists {
                entity: "Job",
                id: job_id,
            });
        }

        let entry = JobEntry {
            job: Job::new(job_id.clone(), params),
            cancel: CancellationToken::new(),
        };
        jobs.insert(job_id.clone(), Arc::new(Mutex::new(entry)));

        Ok(job_id)
    }

    /// Return a point-in-time copy of the job record.
    pub fn get(&self, job_id: &str) -> Result<Job, CoreError> {
        let entry = self.entry(job_id)?;
        let guard = entry.lock().expect("job entry lock poisoned");
        Ok(guard.job.clone())
    }

    /// Number of jobs currently tracked (all states).
    pub fn len(&self) -> usize {
        self.jobs.read().expect("job map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The token the executor hands to the backend for this job.
    pub fn cancellation_token(&self, job_id: &str) -> Result<CancellationToken, CoreError> {
        let entry = self.entry(job_id)?;
        let guard = entry.lock().expect("job entry lock poisoned");
        Ok(guard.cancel.clone())
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// `Pending -> Running`; records the start time.
    pub fn mark_running(&self, job_id: &str) -> Result<(), CoreError> {
        self.transition(job_id, JobStatus::Running, |job| {
            job.started_at = Some(Utc::now());
        })
    }

    /// Record execution progress.
    ///
    /// Only meaningful while `Running`: values are clamped to `[0.0, 1.0]`
    /// and never move backwards. A report arriving after the job already
    /// reached a terminal state (the worker racing a cancellation or
    /// failure) is dropped silently; a report against a `Pending` job is a
    /// precondition failure.
    pub fn update_progress(&self, job_id: &str, progress: f32) -> Result<(), CoreError> {
        let entry = self.entry(job_id)?;
        let mut guard = entry.lock().expect("job entry lock poisoned");

        match guard.job.status {
            JobStatus::Running => {
                let clamped = progress.clamp(0.0, 1.0);
                if clamped > guard.job.progress {
                    guard.job.progress = clamped;
                }
                Ok(())
            }
            status if status.is_terminal() => Ok(()),
            status => Err(CoreError::FailedPrecondition(format!(
                "Cannot report progress for job {job_id} in status {status}"
            ))),
        }
    }

    /// Record training metrics; same status rules as [`update_progress`].
    ///
    /// [`update_progress`]: JobRegistry::update_progress
    pub fn update_training_metrics(
        &self,
        job_id: &str,
        metrics: TrainingMetrics,
    ) -> Result<(), CoreError> {
        let entry = self.entry(job_id)?;
        let mut guard = entry.lock().expect("job entry lock poisoned");

        match guard.job.status {
            JobStatus::Running => {
                guard.job.metrics = Some(metrics);
                Ok(())
            }
            status if status.is_terminal() => Ok(()),
            status => Err(CoreError::FailedPrecondition(format!(
                "Cannot report metrics for job {job_id} in status {status}"
            ))),
        }
    }

    /// `Running -> Completed`; records the result location.
    pub fn complete(&self, job_id: &str, result_path: impl Into<String>) -> Result<(), CoreError> {
        let result_path = result_path.into();
        self.transition(job_id, JobStatus::Completed, move |job| {
            job.result_path = Some(result_path);
            job.finished_at = Some(Utc::now());
        })
    }

    /// Any non-terminal state `-> Failed`; records the error message.
    pub fn fail(&self, job_id: &str, error_message: impl Into<String>) -> Result<(), CoreError> {
        let mut message = error_message.into();
        if message.is_empty() {
            message = UNSPECIFIED_FAILURE.to_string();
        }
        self.transition(job_id, JobStatus::Failed, move |job| {
            job.error_message = Some(message);
            job.finished_at = Some(Utc::now());
        })
    }

    /// Request cancellation and return the status resulting from this call.
    ///
    /// - `Pending` jobs are cancelled outright (the executor will find the
    ///   job already terminal and never invoke the backend).
    /// - `Running` jobs have their token tripped; the returned status is
    ///   still `Running` until the worker observes the token and the
    ///   executor records the terminal state.
    /// - Terminal jobs are untouched; the existing status is returned.
    ///
    /// Idempotent: repeating the call yields the same final status.
    pub fn cancel(&self, job_id: &str) -> Result<JobStatus, CoreError> {
        let entry = self.entry(job_id)?;
        let mut guard = entry.lock().expect("job entry lock poisoned");

        match guard.job.status {
            JobStatus::Pending => {
                guard.job.status = JobStatus::Cancelled;
                guard.job.finished_at = Some(Utc::now());
                guard.cancel.cancel();
                Ok(JobStatus::Cancelled)
            }
            JobStatus::Running => {
                guard.cancel.cancel();
                Ok(JobStatus::Running)
            }
            terminal => Ok(terminal),
        }
    }

    /// Record that the worker observed cancellation: `Pending`/`Running`
    /// `-> Cancelled`. A job already `Cancelled` is left untouched.
    pub fn mark_cancelled(&self, job_id: &str) -> Result<(), CoreError> {
        let entry = self.entry(job_id)?;
        let mut guard = entry.lock().expect("job entry lock poisoned");

        match guard.job.status {
            JobStatus::Cancelled => Ok(()),
            status if status.is_terminal() => Err(CoreError::FailedPrecondition(format!(
                "Cannot cancel job {job_id} in terminal status {status}"
            ))),
            _ => {
                guard.job.status = JobStatus::Cancelled;
                guard.job.finished_at = Some(Utc::now());
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn entry(&self, job_id: &str) -> Result<Arc<Mutex<JobEntry>>, CoreError> {
        self.jobs
            .read()
            .expect("job map lock poisoned")
            .get(job_id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
    }

    /// Apply a checked `current -> to` transition, then run `apply` on the
    /// record under the entry lock.
    fn transition(
        &self,
        job_id: &str,
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<(), CoreError> {
        let entry = self.entry(job_id)?;
        let mut guard = entry.lock().expect("job entry lock poisoned");

        let from = guard.job.status;
        if !JobStatus::can_transition(from, to) {
            return Err(CoreError::FailedPrecondition(format!(
                "Job {job_id} cannot move from {from} to {to}"
            )));
        }

        guard.job.status = to;
        apply(&mut guard.job);
        Ok(())
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use foldserve_core::params::{MsaParams, PredictionParams, TrainingParams};

    fn registry() -> JobRegistry {
        JobRegistry::new()
    }

    fn msa_params() -> JobParams {
        JobParams::Msa(MsaParams {
            sequence: "MVKVGVNG".to_string(),
            ..MsaParams::default()
        })
    }

    fn prediction_params() -> JobParams {
        JobParams::Prediction(PredictionParams {
            sequence: "MVKVGVNG".to_string(),
            ..PredictionParams::default()
        })
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    #[test]
    fn create_returns_generated_id_and_pending_job() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        assert!(!id.is_empty());

        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn create_honours_caller_supplied_id() {
        let reg = registry();
        let id = reg
            .create(msa_params(), Some("job-abc".to_string()))
            .unwrap();
        assert_eq!(id, "job-abc");
    }

    #[test]
    fn empty_requested_id_gets_a_generated_one() {
        let reg = registry();
        let id = reg.create(msa_params(), Some(String::new())).unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let reg = registry();
        reg.create(msa_params(), Some("dup".to_string())).unwrap();
        let err = reg.create(prediction_params(), Some("dup".to_string()));
        assert_matches!(err, Err(CoreError::AlreadyExists { .. }));

        // The original job is untouched.
        assert_eq!(reg.get("dup").unwrap().kind, foldserve_core::job::JobKind::Msa);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let reg = registry();
        assert_matches!(reg.get("nope"), Err(CoreError::NotFound { .. }));
        assert_matches!(reg.cancel("nope"), Err(CoreError::NotFound { .. }));
    }

    #[test]
    fn kind_is_stable_across_reads() {
        let reg = registry();
        let id = reg.create(prediction_params(), None).unwrap();
        for _ in 0..3 {
            assert_eq!(
                reg.get(&id).unwrap().kind,
                foldserve_core::job::JobKind::Inference
            );
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    #[test]
    fn full_successful_lifecycle() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();

        reg.mark_running(&id).unwrap();
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Running);
        assert!(reg.get(&id).unwrap().started_at.is_some());

        reg.update_progress(&id, 0.4).unwrap();
        reg.complete(&id, "/cache/msa/x/msa.a3m").unwrap();

        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_path.as_deref(), Some("/cache/msa/x/msa.a3m"));
        assert!(job.error_message.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn complete_requires_running() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        assert_matches!(
            reg.complete(&id, "/out"),
            Err(CoreError::FailedPrecondition(_))
        );
    }

    #[test]
    fn fail_from_pending_and_running() {
        let reg = registry();

        let a = reg.create(msa_params(), None).unwrap();
        reg.fail(&a, "backend unreachable").unwrap();
        assert_eq!(reg.get(&a).unwrap().status, JobStatus::Failed);

        let b = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&b).unwrap();
        reg.fail(&b, "hhblits exited with status 1").unwrap();

        let job = reg.get(&b).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("hhblits exited with status 1")
        );
        assert!(job.result_path.is_none());
    }

    #[test]
    fn fail_on_terminal_job_is_a_precondition_failure() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();
        reg.complete(&id, "/out").unwrap();

        assert_matches!(
            reg.fail(&id, "late failure"),
            Err(CoreError::FailedPrecondition(_))
        );
    }

    #[test]
    fn empty_failure_message_is_replaced() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.fail(&id, "").unwrap();

        let msg = reg.get(&id).unwrap().error_message.unwrap();
        assert!(!msg.is_empty());
    }

    #[test]
    fn mark_running_twice_fails() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();
        assert_matches!(
            reg.mark_running(&id),
            Err(CoreError::FailedPrecondition(_))
        );
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();

        reg.update_progress(&id, 0.5).unwrap();
        assert_eq!(reg.get(&id).unwrap().progress, 0.5);

        // A lower report never moves progress backwards.
        reg.update_progress(&id, 0.2).unwrap();
        assert_eq!(reg.get(&id).unwrap().progress, 0.5);

        // Out-of-range reports are clamped.
        reg.update_progress(&id, 7.0).unwrap();
        assert_eq!(reg.get(&id).unwrap().progress, 1.0);
    }

    #[test]
    fn progress_on_pending_job_is_a_precondition_failure() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        assert_matches!(
            reg.update_progress(&id, 0.1),
            Err(CoreError::FailedPrecondition(_))
        );
    }

    #[test]
    fn progress_after_terminal_state_is_dropped() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();
        reg.complete(&id, "/out").unwrap();

        // The worker racing the completion must not error or mutate.
        reg.update_progress(&id, 0.9).unwrap();
        assert_eq!(reg.get(&id).unwrap().progress, 0.0);
    }

    #[test]
    fn training_metrics_update_while_running() {
        let reg = registry();
        let id = reg
            .create(
                JobParams::Training(TrainingParams {
                    config_path: "cfg.yaml".to_string(),
                    num_gpus: 1,
                    output_dir: "/runs/t".to_string(),
                    experiment_name: "t".to_string(),
                    ..TrainingParams::default()
                }),
                None,
            )
            .unwrap();

        reg.mark_running(&id).unwrap();
        reg.update_training_metrics(
            &id,
            TrainingMetrics {
                current_epoch: 3.0,
                train_loss: 0.42,
                val_loss: 0.57,
                checkpoint_path: Some("/runs/t/epoch3.ckpt".to_string()),
            },
        )
        .unwrap();

        let metrics = reg.get(&id).unwrap().metrics.unwrap();
        assert_eq!(metrics.current_epoch, 3.0);
        assert_eq!(metrics.checkpoint_path.as_deref(), Some("/runs/t/epoch3.ckpt"));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn cancel_pending_job_is_immediate() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();

        let status = reg.cancel(&id).unwrap();
        assert_eq!(status, JobStatus::Cancelled);

        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result_path.is_none());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn cancel_running_job_trips_the_token() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();

        let token = reg.cancellation_token(&id).unwrap();
        assert!(!token.is_cancelled());

        // Cooperative: the status stays Running until the worker observes.
        let status = reg.cancel(&id).unwrap();
        assert_eq!(status, JobStatus::Running);
        assert!(token.is_cancelled());

        reg.mark_cancelled(&id).unwrap();
        assert_eq!(reg.get(&id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn cancel_is_idempotent() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();

        let first = reg.cancel(&id).unwrap();
        let second = reg.cancel(&id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cancel_of_finished_job_is_a_no_op() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&id).unwrap();
        reg.complete(&id, "/out").unwrap();

        let status = reg.cancel(&id).unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(
            reg.get(&id).unwrap().result_path.as_deref(),
            Some("/out")
        );
    }

    #[test]
    fn mark_cancelled_is_idempotent_but_rejects_other_terminal_states() {
        let reg = registry();
        let id = reg.create(msa_params(), None).unwrap();
        reg.cancel(&id).unwrap();
        reg.mark_cancelled(&id).unwrap();

        let done = reg.create(msa_params(), None).unwrap();
        reg.mark_running(&done).unwrap();
        reg.complete(&done, "/out").unwrap();
        assert_matches!(
            reg.mark_cancelled(&done),
            Err(CoreError::FailedPrecondition(_))
        );
    }
}
