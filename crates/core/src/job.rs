//! The job model: kinds, the lifecycle state machine, and the job record.
//!
//! A job moves `Pending -> Running -> {Completed, Failed, Cancelled}`, with
//! `Pending -> Cancelled` and `Pending -> Failed` allowed directly. The
//! three right-hand states are terminal: no transition leaves them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::params::JobParams;

/// All timestamps are UTC.
pub type Timestamp = DateTime<Utc>;

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The three kinds of work the services accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Structure prediction from a single protein sequence.
    Inference,
    /// Multiple sequence alignment search.
    Msa,
    /// Model training run.
    Training,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Inference => "inference",
            JobKind::Msa => "msa",
            JobKind::Training => "training",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Job execution status.
///
/// The wire encoding is the lowercase string returned by
/// [`JobStatus::as_str`]; these five values are the only ones the services
/// ever emit or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the `from -> to` edge exists in the lifecycle state machine.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(crate::CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TrainingMetrics
// ---------------------------------------------------------------------------

/// Training-specific progress figures, updated by the worker per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub current_epoch: f32,
    pub train_loss: f32,
    pub val_loss: f32,
    /// Best checkpoint written so far, if any.
    pub checkpoint_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One unit of submitted work, tracked by id through its lifecycle.
///
/// `job_id`, `kind`, and `params` are immutable once assigned; everything
/// else is mutated by the executor driving the job, or by a cancellation
/// request. In a terminal state exactly one of `result_path` /
/// `error_message` is set for `Completed` / `Failed`; `Cancelled` sets
/// neither.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Fraction complete in `[0.0, 1.0]`; non-decreasing while `Running`.
    pub progress: f32,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    /// The original request payload, retained for audit.
    pub params: JobParams,
    /// Set for training jobs only, while running and afterwards.
    pub metrics: Option<TrainingMetrics>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// Create a fresh `Pending` job with zero progress.
    pub fn new(job_id: impl Into<String>, params: JobParams) -> Self {
        Self {
            job_id: job_id.into(),
            kind: params.kind(),
            status: JobStatus::Pending,
            progress: 0.0,
            result_path: None,
            error_message: None,
            params,
            metrics: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{JobParams, MsaParams};

    fn msa_params() -> JobParams {
        JobParams::Msa(MsaParams {
            sequence: "MVKVGVNG".to_string(),
            ..MsaParams::default()
        })
    }

    // -----------------------------------------------------------------------
    // Status strings
    // -----------------------------------------------------------------------

    #[test]
    fn status_round_trips_through_wire_string() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!("started".parse::<JobStatus>().is_err());
        assert!("".parse::<JobStatus>().is_err());
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    #[test]
    fn pending_to_running() {
        assert!(JobStatus::can_transition(
            JobStatus::Pending,
            JobStatus::Running
        ));
    }

    #[test]
    fn pending_to_cancelled() {
        assert!(JobStatus::can_transition(
            JobStatus::Pending,
            JobStatus::Cancelled
        ));
    }

    #[test]
    fn running_to_all_terminal_states() {
        for to in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(JobStatus::can_transition(JobStatus::Running, to));
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        assert!(!JobStatus::can_transition(
            JobStatus::Pending,
            JobStatus::Completed
        ));
    }

    #[test]
    fn no_transition_leaves_a_terminal_state() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!JobStatus::can_transition(from, to));
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    // -----------------------------------------------------------------------
    // Job construction
    // -----------------------------------------------------------------------

    #[test]
    fn new_job_is_pending_with_zero_progress() {
        let job = Job::new("job-1", msa_params());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.kind, JobKind::Msa);
        assert!(job.result_path.is_none());
        assert!(job.error_message.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }
}
