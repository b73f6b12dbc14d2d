//! Submission, status, and cancel logic shared by the three façades.

use tonic::Status;

use foldserve_core::job::Job;
use foldserve_core::params::JobParams;
use foldserve_proto::v1::{CancelJobResponse, JobStatusResponse};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Validate the request payload, create the job, and hand it to the
/// executor. Returns the (possibly server-generated) job id.
///
/// Validation failures surface synchronously; no job is allocated for an
/// invalid request. The executor runs the job out-of-band, so this never
/// blocks on execution.
pub fn submit_job(state: &AppState, params: JobParams, requested_id: String) -> AppResult<String> {
    params.validate(state.config.max_sequence_length)?;

    let kind = params.kind();
    let job_id = state.registry.create(params, Some(requested_id))?;
    state.executor.dispatch(job_id.clone());

    tracing::info!(job_id = %job_id, kind = %kind, "Job submitted");
    Ok(job_id)
}

/// Fetch a job snapshot, mapping registry errors onto wire status codes.
pub fn get_job(state: &AppState, job_id: &str) -> Result<Job, Status> {
    state
        .registry
        .get(job_id)
        .map_err(|e| AppError::from(e).into())
}

/// Project a job record into the shared status response shape.
///
/// `result_path` and `error_message` are empty except in the matching
/// terminal state.
pub fn job_status_response(job: &Job) -> JobStatusResponse {
    JobStatusResponse {
        job_id: job.job_id.clone(),
        status: job.status.to_string(),
        progress: job.progress,
        result_path: job.result_path.clone().unwrap_or_default(),
        error_message: job.error_message.clone().unwrap_or_default(),
    }
}

/// Request cooperative cancellation and report the resulting status.
pub fn cancel_job(state: &AppState, job_id: &str) -> Result<CancelJobResponse, Status> {
    let status = state
        .registry
        .cancel(job_id)
        .map_err(|e| Status::from(AppError::from(e)))?;

    tracing::info!(job_id = %job_id, status = %status, "Job cancellation requested");

    Ok(CancelJobResponse {
        job_id: job_id.to_string(),
        status: status.to_string(),
    })
}

/// Substitute a default for proto3's zero value on optional numeric fields.
pub fn default_if_zero(value: i32, default: i32) -> i32 {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Substitute a default for proto3's empty string on optional fields.
pub fn default_if_empty(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}
