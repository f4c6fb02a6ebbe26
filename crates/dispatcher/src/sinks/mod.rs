//! Sink implementations
//!
//! Contains LogSink and FileSink.

mod file;
mod log;

pub use self::file::{FileSink, FileSinkConfig, FrameMetadata};
pub use self::log::LogSink;

#[cfg(test)]
pub(crate) fn test_frame(frame_id: contracts::FrameId) -> contracts::CompletedFrame {
    contracts::CompletedFrame {
        frame_id,
        vehicles: vec![1, 2],
        points: vec![1.0, 2.0, 3.0, 0.5, -1.0, -2.0, -3.0, 0.25].into(),
        latency_ms: Some(42.0),
    }
}
