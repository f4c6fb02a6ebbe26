//! External collaborator interfaces consumed by the core.
//!
//! The codec, partitioner, merge math and inference engine are black boxes to
//! the pipeline; these traits are the only surface it sees.

use crate::{
    CodecError, ContractError, DetectionError, DownlinkMessage, MergeError, PartitionDecision,
    PartitionError, VehicleId, VehicleLocation,
};

/// Point-cloud compression codec
pub trait PointCloudCodec: Send + Sync {
    /// Decompress a chunk into samples (`POINT_STRIDE` floats per point)
    fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>, CodecError>;

    /// Compress samples with the given effort level and quantization bits
    fn encode(&self, points: &[f32], level: u8, quantization: u8) -> Result<Vec<u8>, CodecError>;
}

/// Spatial partition-decision generator
pub trait Partitioner: Send + Sync {
    /// `poses[i]` and `bandwidths_mbps[i]` describe the same vehicle
    fn partition(
        &self,
        poses: &[VehicleLocation],
        bandwidths_mbps: &[f64],
    ) -> Result<PartitionDecision, PartitionError>;
}

/// Write-only view of a reserved merge-buffer range
pub trait MergeTarget {
    /// Floats reserved for this writer
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `values` starting at `start` (relative to the reserved range)
    fn write_slice(&self, start: usize, values: &[f32]);
}

/// Coordinate transform + copy into the merge buffer
pub trait PointCloudMerger: Send + Sync {
    /// Reject inputs `merge_into` cannot transform. Callers run this before
    /// reserving any part of the merge buffer.
    fn validate(
        &self,
        primary: &VehicleLocation,
        points: &[f32],
        source: &VehicleLocation,
    ) -> Result<(), MergeError>;

    /// Transform `points` from `source`'s frame into `primary`'s and write
    /// them into `target`. Inputs are validated before anything is written.
    fn merge_into(
        &self,
        target: &dyn MergeTarget,
        primary: &VehicleLocation,
        points: &[f32],
        source: &VehicleLocation,
    ) -> Result<(), MergeError>;
}

/// Inference over a merged point cloud
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, points: &[f32]) -> Result<String, DetectionError>;
}

/// Edge → vehicle message queue
pub trait DownlinkSender: Send + Sync {
    /// Enqueue without waiting for the write
    fn send(&self, vehicle_id: VehicleId, message: DownlinkMessage) -> Result<(), ContractError>;
}
