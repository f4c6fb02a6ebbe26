//! Units of work exchanged between the framer and the task pipeline.

use crate::{ContractError, FrameId, SensorDataChunk, VehicleId, VehicleLocation};

/// Work submitted to the pipeline
#[derive(Debug, Clone)]
pub enum Task {
    /// Decode a chunk's compressed bytes
    Decode(SensorDataChunk),
    /// Install a vehicle pose for a frame
    LocationUpdate {
        vehicle_id: VehicleId,
        frame_id: FrameId,
        location: VehicleLocation,
    },
    /// Write samples into a frame's merge buffer
    Merge(MergeRequest),
    /// Run inference over a completed frame
    ObjectDetection { frame_id: FrameId },
}

impl Task {
    /// Label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::LocationUpdate { .. } => "location_update",
            Self::Merge(MergeRequest::Immediate(_)) => "merge",
            Self::Merge(MergeRequest::Cleanup { .. }) => "merge_cleanup",
            Self::ObjectDetection { .. } => "object_detection",
        }
    }

    pub fn frame_id(&self) -> FrameId {
        match self {
            Self::Decode(chunk) => chunk.frame_id,
            Self::LocationUpdate { frame_id, .. } => *frame_id,
            Self::Merge(MergeRequest::Immediate(chunk)) => chunk.frame_id,
            Self::Merge(MergeRequest::Cleanup { frame_id }) => *frame_id,
            Self::ObjectDetection { frame_id } => *frame_id,
        }
    }
}

/// The two merge modes
#[derive(Debug, Clone)]
pub enum MergeRequest {
    /// One decoded chunk is ready
    Immediate(SensorDataChunk),
    /// The primary pose for this frame arrived; drain the backlog
    Cleanup { frame_id: FrameId },
}

/// Fire-and-forget task submission seam used by the framer
pub trait TaskSink: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), ContractError>;
}
