use thiserror::Error;

use appointment_cell::models::AppointmentError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Sweep scan failed: {0}")]
    ScanFailed(#[from] AppointmentError),

    #[error("Maintenance hook '{hook}' failed: {message}")]
    MaintenanceFailed { hook: String, message: String },

    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    #[error("Scheduler worker is already running")]
    AlreadyRunning,
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::ScanFailed(inner) => inner.into(),
            OrchestratorError::AlreadyRunning => AppError::Conflict(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
