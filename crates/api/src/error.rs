use foldserve_core::CoreError;
use tonic::Status;

/// Application-level error type for the gRPC façades.
///
/// Wraps [`CoreError`] for domain errors; converts into [`tonic::Status`]
/// so handlers can use `?` and return consistent wire errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `foldserve_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for façade-internal results.
pub type AppResult<T> = Result<T, AppError>;

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => {
                    Status::not_found(format!("{entity} {id} not found"))
                }
                CoreError::Validation(msg) => Status::invalid_argument(msg),
                CoreError::AlreadyExists { entity, id } => {
                    Status::already_exists(format!("{entity} {id} already exists"))
                }
                CoreError::FailedPrecondition(msg) => Status::failed_precondition(msg),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    Status::internal("An internal error occurred")
                }
                CoreError::Unavailable(msg) => Status::unavailable(msg),
            },
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Status::internal("An internal error occurred")
            }
        }
    }
}
