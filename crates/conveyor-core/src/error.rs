use thiserror::Error;

use crate::domain::TaskId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any mutation: unknown task_type, malformed params,
    /// unparsable filter.
    #[error("validation: {0}")]
    Validation(String),

    #[error("no such task: {0}")]
    NotFound(TaskId),

    /// Completion attempted on a record that is not currently PROCESSING
    /// (double completion, or an operator requeued it mid-flight).
    #[error("task {0} is not PROCESSING")]
    NotProcessing(TaskId),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    /// Both variants that mean "the id you asked about is not completable".
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_) | EngineError::NotProcessing(_))
    }
}
