//! Structure prediction façade.

use tonic::{Request, Response, Status};

use foldserve_core::params::{
    JobParams, PredictionParams, DEFAULT_DIFFUSION_SAMPLES, DEFAULT_MODEL_VERSION,
    DEFAULT_OUTPUT_FORMAT, DEFAULT_RECYCLING_STEPS, DEFAULT_SAMPLING_STEPS,
};
use foldserve_core::sequence::normalize_sequence;
use foldserve_proto::v1::inference_service_server::InferenceService as InferenceGrpc;
use foldserve_proto::v1::{
    CancelJobRequest, CancelJobResponse, JobStatusRequest, JobStatusResponse, PredictionRequest,
    PredictionResponse,
};

use crate::services::common;
use crate::state::AppState;

/// gRPC façade for structure prediction jobs.
pub struct InferenceService {
    state: AppState,
}

impl InferenceService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// Normalise the sequence and apply defaults for proto3 zero values.
fn prediction_params(req: &PredictionRequest) -> PredictionParams {
    PredictionParams {
        sequence: normalize_sequence(&req.sequence),
        recycling_steps: common::default_if_zero(req.recycling_steps, DEFAULT_RECYCLING_STEPS),
        sampling_steps: common::default_if_zero(req.sampling_steps, DEFAULT_SAMPLING_STEPS),
        diffusion_samples: common::default_if_zero(req.diffusion_samples, DEFAULT_DIFFUSION_SAMPLES),
        output_format: common::default_if_empty(req.output_format.clone(), DEFAULT_OUTPUT_FORMAT),
        model_version: common::default_if_empty(req.model_version.clone(), DEFAULT_MODEL_VERSION),
    }
}

#[tonic::async_trait]
impl InferenceGrpc for InferenceService {
    async fn predict_structure(
        &self,
        request: Request<PredictionRequest>,
    ) -> Result<Response<PredictionResponse>, Status> {
        let req = request.into_inner();
        let params = JobParams::Prediction(prediction_params(&req));
        let job_id = common::submit_job(&self.state, params, req.job_id)?;
        let job = common::get_job(&self.state, &job_id)?;

        Ok(Response::new(PredictionResponse {
            job_id,
            status: job.status.to_string(),
            result_path: String::new(),
            error_message: String::new(),
        }))
    }

    async fn get_job_status(
        &self,
        request: Request<JobStatusRequest>,
    ) -> Result<Response<JobStatusResponse>, Status> {
        let job = common::get_job(&self.state, &request.into_inner().job_id)?;
        Ok(Response::new(common::job_status_response(&job)))
    }

    async fn cancel_job(
        &self,
        request: Request<CancelJobRequest>,
    ) -> Result<Response<CancelJobResponse>, Status> {
        let response = common::cancel_job(&self.state, &request.into_inner().job_id)?;
        Ok(Response::new(response))
    }
}
