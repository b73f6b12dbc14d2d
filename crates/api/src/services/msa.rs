//! Alignment search façade.

use tonic::{Request, Response, Status};

use foldserve_core::params::{
    JobParams, MsaParams, DEFAULT_MAX_SEQS, DEFAULT_NUM_ITERATIONS,
};
use foldserve_core::sequence::normalize_sequence;
use foldserve_proto::v1::msa_service_server::MsaService as MsaGrpc;
use foldserve_proto::v1::{
    CancelJobRequest, CancelJobResponse, JobStatusRequest, JobStatusResponse, MsaRequest,
    MsaResponse,
};

use crate::services::common;
use crate::state::AppState;

/// gRPC façade for alignment search jobs.
pub struct MsaService {
    state: AppState,
}

impl MsaService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

/// Normalise the sequence and apply defaults for proto3 zero values.
/// `min_identity` keeps its zero value: 0 means the filter is off.
fn msa_params(req: &MsaRequest) -> MsaParams {
    MsaParams {
        sequence: normalize_sequence(&req.sequence),
        max_seqs: common::default_if_zero(req.max_seqs, DEFAULT_MAX_SEQS),
        min_identity: req.min_identity,
        num_iterations: common::default_if_zero(req.num_iterations, DEFAULT_NUM_ITERATIONS),
    }
}

#[tonic::async_trait]
impl MsaGrpc for MsaService {
    async fn generate_msa(
        &self,
        request: Request<MsaRequest>,
    ) -> Result<Response<MsaResponse>, Status> {
        let req = request.into_inner();
        let params = JobParams::Msa(msa_params(&req));
        let job_id = common::submit_job(&self.state, params, req.job_id)?;
        let job = common::get_job(&self.state, &job_id)?;

        Ok(Response::new(MsaResponse {
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
