//! Per-vehicle and per-frame records.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{ChunkId, FrameId, SensorDataChunk, VehicleId, VehicleLocation};

/// One (vehicle, frame) record, created lazily on first chunk or pose
#[derive(Debug, Clone, Default)]
pub struct SensorDataFrame {
    pub location: Option<VehicleLocation>,
    pub chunks: BTreeMap<ChunkId, SensorDataChunk>,
    pub merged: bool,
}

impl SensorDataFrame {
    /// Highest chunk id present, 0 when none
    #[inline]
    pub fn latest_chunk_id(&self) -> ChunkId {
        self.chunks.keys().next_back().copied().unwrap_or(0)
    }
}

/// Everything the edge knows about one vehicle.
///
/// `pending_neighbors` is the completion checker's working set; it is always
/// a subset of `neighbors` and is cleared whenever a new neighbour set lands.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle_id: VehicleId,
    pub online: bool,
    pub object_prediction: Option<String>,
    pub frames: BTreeMap<FrameId, SensorDataFrame>,
    /// Smoothed bandwidth at the last partition decision
    pub bandwidth_kbps: Option<f64>,
    pub neighbors: BTreeSet<VehicleId>,
    pub pending_neighbors: BTreeSet<VehicleId>,
}

impl VehicleState {
    pub fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            online: false,
            object_prediction: None,
            frames: BTreeMap::new(),
            bandwidth_kbps: None,
            neighbors: BTreeSet::new(),
            pending_neighbors: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn frame(&self, frame_id: FrameId) -> Option<&SensorDataFrame> {
        self.frames.get(&frame_id)
    }

    /// Get-or-create the frame record
    #[inline]
    pub fn frame_mut(&mut self, frame_id: FrameId) -> &mut SensorDataFrame {
        self.frames.entry(frame_id).or_default()
    }

    pub fn latest_chunk_id(&self, frame_id: FrameId) -> ChunkId {
        self.frame(frame_id)
            .map_or(0, SensorDataFrame::latest_chunk_id)
    }

    /// Highest frame id whose record is marked merged
    pub fn latest_merged_frame_id(&self) -> Option<FrameId> {
        self.frames
            .iter()
            .rev()
            .find(|(_, frame)| frame.merged)
            .map(|(id, _)| *id)
    }

    pub fn location(&self, frame_id: FrameId) -> Option<&VehicleLocation> {
        self.frame(frame_id).and_then(|f| f.location.as_ref())
    }

    /// Install a fresh neighbour set and reset the working set
    pub fn install_neighbors(&mut self, neighbors: BTreeSet<VehicleId>) {
        self.neighbors = neighbors;
        self.pending_neighbors.clear();
    }

    /// Refill the working set, only when it has been fully drained
    pub fn reseed_pending(&mut self) {
        if self.pending_neighbors.is_empty() {
            self.pending_neighbors = self.neighbors.clone();
        }
    }
}
