use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control-plane error taxonomy.
///
/// `NotFound` and `PreconditionFailed` are expected outcomes of normal
/// operation, not defects; a frontend maps them to 404/412 equivalents.
#[derive(Error, Debug)]
pub enum Error {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("render validation failed: {0}")]
    RenderValidation(String),

    #[error("dependency unresolved: {0}")]
    DependencyUnresolved(String),

    #[error("deploying {resource}: {source}")]
    DeployFailed {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("an operation is already in progress for {0}")]
    OperationAlreadyRunning(String),

    #[error("operation {0} is already in a terminal state")]
    OperationCompleted(String),

    #[error("message lease lost: {0}")]
    LeaseLost(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Error::PreconditionFailed(_))
    }

    /// Stable machine-readable code, recorded on failed operations.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::PreconditionFailed(_) => "PreconditionFailed",
            Error::InvalidModel(_) => "InvalidModel",
            Error::RenderValidation(_) => "RenderValidation",
            Error::DependencyUnresolved(_) => "DependencyUnresolved",
            Error::DeployFailed { .. } => "DeployFailed",
            Error::OperationAlreadyRunning(_) => "OperationAlreadyRunning",
            Error::OperationCompleted(_) => "OperationCompleted",
            Error::LeaseLost(_) => "LeaseLost",
            Error::Internal(_) => "Internal",
        }
    }
}

/// Serializable error payload stored on failed async operations and
/// surfaced to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&Error> for ErrorDetail {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
