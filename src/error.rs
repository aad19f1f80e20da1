use thiserror::Error;

/// Errors reported by an [`Orchestrator`](crate::orchestrator::Orchestrator) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Resource already exists: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Job already exists: {0}")]
    Conflict(String),

    #[error("Duplicate job id in database: {0}")]
    DuplicateKey(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
