use thiserror::Error;

/// Failures that stop an operation before (or instead of) producing a report.
///
/// A remote command exiting non-zero is not an `OpsError`; operations report it in
/// their payload and exit 1.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("{0}")]
    Precondition(String),
    #[error("operation_in_progress: {0}")]
    OperationInProgress(String),
    #[error(transparent)]
    Core(#[from] ops_core::CoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OpsError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        OpsError::Precondition(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            OpsError::Precondition(_) => "precondition_failed",
            OpsError::OperationInProgress(_) => "operation_in_progress",
            OpsError::Core(_) | OpsError::Io(_) | OpsError::Csv(_) => "io_error",
            OpsError::Other(_) => "command_failed",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            OpsError::Precondition(_) | OpsError::OperationInProgress(_) => 2,
            OpsError::Core(_) | OpsError::Io(_) | OpsError::Csv(_) | OpsError::Other(_) => 1,
        }
    }
}

pub type OpsResult<T> = std::result::Result<T, OpsError>;
