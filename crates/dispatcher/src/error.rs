//! Dispatcher error types

use contracts::FrameId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink could not be constructed from its config
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Queue full - frame dropped
    #[error("queue full for sink '{sink_name}', frame {frame_id} dropped")]
    QueueFull { sink_name: String, frame_id: FrameId },

    /// Sink worker gone (panicked or closed early)
    #[error("sink '{sink_name}' worker closed")]
    WorkerClosed { sink_name: String },

    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),
}

impl DispatcherError {
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
