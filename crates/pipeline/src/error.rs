//! Pipeline error types

use coordinator::CoordinatorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Task body returned an error
    #[error(transparent)]
    Task(#[from] CoordinatorError),

    /// Task body panicked or was cancelled
    #[error("task {kind} aborted: {message}")]
    Aborted { kind: &'static str, message: String },

    /// Scheduler loop itself did not exit cleanly
    #[error("pipeline loop failed: {message}")]
    Loop { message: String },
}

impl PipelineError {
    pub fn aborted(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Aborted {
            kind,
            message: message.into(),
        }
    }
}
