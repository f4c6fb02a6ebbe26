//! Core data model: ids, poses, chunks and completed frames.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Vehicle id as carried in the uplink header
pub type VehicleId = u32;

/// Frame id (one synchronized capture instant across all vehicles)
pub type FrameId = u16;

/// Chunk id (one partition of a vehicle's point cloud for a frame)
pub type ChunkId = u16;

/// Floats per point sample: x, y, z, intensity
pub const POINT_STRIDE: usize = 4;

/// Opaque pose vector for one (vehicle, frame).
///
/// Layout follows the OXTS convention the vehicles report:
/// `[x, y, z, roll, pitch, yaw, ...]`. Extra trailing components are kept
/// untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleLocation(Vec<f32>);

impl VehicleLocation {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const Z: usize = 2;
    pub const ROLL: usize = 3;
    pub const PITCH: usize = 4;
    pub const YAW: usize = 5;

    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// Planar position, if the pose carries one
    pub fn xy(&self) -> Option<(f32, f32)> {
        Some((self.get(Self::X)?, self.get(Self::Y)?))
    }
}

impl From<Vec<f32>> for VehicleLocation {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// One partition of one vehicle's point cloud for one frame.
///
/// `decoded` is shared behind an `Arc` so readers never copy sample data.
/// Once a chunk with decoded samples has been stored it is never replaced.
#[derive(Debug, Clone)]
pub struct SensorDataChunk {
    pub vehicle_id: VehicleId,
    pub frame_id: FrameId,
    pub chunk_id: ChunkId,
    /// Raw codec bytes (`P` messages only)
    pub compressed: Option<Bytes>,
    /// Decoded samples, `POINT_STRIDE` floats per point
    pub decoded: Option<Arc<[f32]>>,
    /// Set once a merge has claimed the samples
    pub used: bool,
}

impl SensorDataChunk {
    /// Chunk still awaiting decode
    pub fn compressed(
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
        bytes: Bytes,
    ) -> Self {
        Self {
            vehicle_id,
            frame_id,
            chunk_id,
            compressed: Some(bytes),
            decoded: None,
            used: false,
        }
    }

    /// Chunk that already carries samples (`R` messages, or after decode)
    pub fn decoded(
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
        points: Vec<f32>,
    ) -> Self {
        Self {
            vehicle_id,
            frame_id,
            chunk_id,
            compressed: None,
            decoded: Some(points.into()),
            used: false,
        }
    }

    /// Attach decoded samples, keeping the compressed bytes
    pub fn with_decoded(mut self, points: Vec<f32>) -> Self {
        self.decoded = Some(points.into());
        self
    }

    #[inline]
    pub fn is_decoded(&self) -> bool {
        self.decoded.is_some()
    }

    /// Number of decoded floats (0 when not decoded)
    pub fn sample_len(&self) -> usize {
        self.decoded.as_ref().map_or(0, |d| d.len())
    }
}

/// Partition boundary descriptor for one neighbour (opaque to the core)
pub type BoundaryDescriptor = Vec<f32>;

/// Output of the partition-decision generator.
///
/// Indices refer to positions in the pose/bandwidth arrays passed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionDecision {
    /// Undirected neighbour pairs `(i, j)`
    pub neighbor_pairs: Vec<(usize, usize)>,
    /// Boundary list per vehicle, same order as the input poses
    pub decisions: Vec<Vec<BoundaryDescriptor>>,
}

/// Merged point cloud for a completed frame, handed to the sinks
#[derive(Debug, Clone)]
pub struct CompletedFrame {
    pub frame_id: FrameId,
    /// Vehicles that took part in the frame, ascending
    pub vehicles: Vec<VehicleId>,
    /// Merge buffer contents up to the write offset
    pub points: Arc<[f32]>,
    /// Milliseconds from the first chunk arrival to completion
    pub latency_ms: Option<f64>,
}

impl CompletedFrame {
    pub fn point_count(&self) -> usize {
        self.points.len() / POINT_STRIDE
    }
}
