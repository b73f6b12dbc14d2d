//! Training façade.

use tonic::{Request, Response, Status};

use foldserve_core::params::{JobParams, TrainingParams};
use foldserve_proto::v1::training_service_server::TrainingService as TrainingGrpc;
use foldserve_proto::v1::{
    CancelJobRequest, CancelJobResponse, JobStatusRequest, JobStatusResponse,
    TrainingJobStatusResponse, TrainingRequest, TrainingResponse,
};

use crate::services::common;
use crate::state::AppState;

/// gRPC façade for training jobs.
pub struct TrainingService {
    state: AppState,
}

impl TrainingService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

fn training_params(req: TrainingRequest) -> TrainingParams {
    TrainingParams {
        config_path: req.config_path,
        args: req.args,
        num_gpus: req.num_gpus,
        output_dir: req.output_dir,
        resume: req.resume,
        checkpoint: Some(req.checkpoint).filter(|c| !c.is_empty()),
        experiment_name: req.experiment_name,
        hyperparameters: req.hyperparameters,
    }
}

#[tonic::async_trait]
impl TrainingGrpc for TrainingService {
    async fn start_training(
        &self,
        request: Request<TrainingRequest>,
    ) -> Result<Response<TrainingResponse>, Status> {
        let mut req = request.into_inner();
        let requested_id = std::mem::take(&mut req.job_id);
        let params = JobParams::Training(training_params(req));
        let job_id = common::submit_job(&self.state, params, requested_id)?;
        let job = common::get_job(&self.state, &job_id)?;

        Ok(Response::new(TrainingResponse {
            job_id,
            status: job.status.to_string(),
            checkpoint_path: String::new(),
            error_message: String::new(),
        }))
    }

    async fn get_training_status(
        &self,
        request: Request<JobStatusRequest>,
    ) -> Result<Response<TrainingJobStatusResponse>, Status> {
        let job = common::get_job(&self.state, &request.into_inner().job_id)?;
        let metrics = job.metrics.clone().unwrap_or_default();

        Ok(Response::new(TrainingJobStatusResponse {
            base: Some(common::job_status_response(&job)),
            current_epoch: metrics.current_epoch,
            val_loss: metrics.val_loss,
            train_loss: metrics.train_loss,
            checkpoint_path: metrics.checkpoint_path.unwrap_or_default(),
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
