pub mod approval_service;
pub mod request_service;
pub mod sync_service;

pub use approval_service::{ApprovalAction, ApprovalOutcome, ApprovalService};
pub use request_service::{CreateRequestInput, RequestService, RequestWithSteps};
pub use sync_service::{SyncReport, SyncService};

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::external::AdapterError;

/// Workflow-level error taxonomy. Validation, conflict and not-found map
/// straight to client responses; upstream covers the directory and the
/// external systems; data-consistency flags invariant violations that
/// abort the whole transaction.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    DataConsistency(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

impl From<DirectoryError> for WorkflowError {
    fn from(err: DirectoryError) -> Self {
        WorkflowError::Upstream(err.to_string())
    }
}

impl From<AdapterError> for WorkflowError {
    fn from(err: AdapterError) -> Self {
        WorkflowError::Upstream(err.to_string())
    }
}
