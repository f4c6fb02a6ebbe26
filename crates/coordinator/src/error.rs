//! Coordinator error types

use contracts::{
    ChunkId, CodecError, ContractError, DetectionError, FrameId, MergeError, PartitionError,
    VehicleId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Vehicle never seen by the coordinator
    #[error("unknown vehicle {vehicle_id}")]
    UnknownVehicle { vehicle_id: VehicleId },

    /// Frame never started (no merge buffer)
    #[error("unknown frame {frame_id}")]
    UnknownFrame { frame_id: FrameId },

    /// No pose stored for (vehicle, frame)
    #[error("no pose for vehicle {vehicle_id} at frame {frame_id}")]
    MissingPose {
        vehicle_id: VehicleId,
        frame_id: FrameId,
    },

    /// Chunk absent or not yet decoded
    #[error("no decoded chunk {chunk_id} for vehicle {vehicle_id} at frame {frame_id}")]
    MissingChunk {
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
    },

    /// Offset request would run past the frame's buffer
    #[error("merge buffer overflow at frame {frame_id}: offset={offset}, requested={requested}, capacity={capacity}")]
    BufferOverflow {
        frame_id: FrameId,
        offset: usize,
        requested: usize,
        capacity: usize,
    },

    /// Partitioner returned indices outside the vehicle list
    #[error("invalid partition decision: {message}")]
    InvalidDecision { message: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl CoordinatorError {
    pub fn missing_pose(vehicle_id: VehicleId, frame_id: FrameId) -> Self {
        Self::MissingPose {
            vehicle_id,
            frame_id,
        }
    }

    pub fn missing_chunk(vehicle_id: VehicleId, frame_id: FrameId, chunk_id: ChunkId) -> Self {
        Self::MissingChunk {
            vehicle_id,
            frame_id,
            chunk_id,
        }
    }

    pub fn invalid_decision(message: impl Into<String>) -> Self {
        Self::InvalidDecision {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
