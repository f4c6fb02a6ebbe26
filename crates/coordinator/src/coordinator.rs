//! SensorDataCoordinator - the edge's authoritative state store
//!
//! Every operation is safe to call from many worker threads at once. See the
//! crate docs for which lock guards what.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use contracts::{
    ChunkId, CompletedFrame, DownlinkMessage, DownlinkSender, EdgeConfig, FrameId, Partitioner,
    SensorDataChunk, VehicleId, VehicleLocation,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::algorithms;
use crate::{
    BandwidthEstimator, CompletionChecker, CoordinatorError, MergeBuffer, MergeRegion, Result,
    VehicleState,
};

/// Backlog of chunks waiting on a primary pose, per frame
pub type UnmergedBacklog = BTreeMap<VehicleId, BTreeSet<ChunkId>>;

/// Static coordinator parameters
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub primary_vehicle_id: VehicleId,
    /// Floats per frame buffer
    pub merge_buffer_capacity: usize,
    pub completion: CompletionChecker,
}

impl CoordinatorSettings {
    pub fn from_config(config: &EdgeConfig) -> Self {
        Self {
            primary_vehicle_id: config.coordinator.primary_vehicle_id,
            merge_buffer_capacity: config.merge_buffer_capacity(),
            completion: CompletionChecker::from_config(&config.coordinator),
        }
    }
}

#[derive(Default)]
struct BacklogState {
    unmerged: HashMap<FrameId, UnmergedBacklog>,
    /// Primary pose per frame; presence means "pose ready"
    primary_poses: HashMap<FrameId, VehicleLocation>,
}

pub struct SensorDataCoordinator {
    settings: CoordinatorSettings,
    vehicles: Mutex<BTreeMap<VehicleId, VehicleState>>,
    backlog: Mutex<BacklogState>,
    merge_buffers: Mutex<HashMap<FrameId, Arc<MergeBuffer>>>,
    timings: Mutex<HashMap<FrameId, Instant>>,
    /// Advanced only by `should_run_object_detection`, which runs on the
    /// pipeline's coordinating loop
    current_frame: AtomicU16,
    bandwidth: Arc<BandwidthEstimator>,
    partitioner: Arc<dyn Partitioner>,
    downlink: Arc<dyn DownlinkSender>,
    completed_tx: Option<mpsc::Sender<CompletedFrame>>,
}

impl SensorDataCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        bandwidth: Arc<BandwidthEstimator>,
        partitioner: Arc<dyn Partitioner>,
        downlink: Arc<dyn DownlinkSender>,
    ) -> Self {
        Self {
            settings,
            vehicles: Mutex::new(BTreeMap::new()),
            backlog: Mutex::new(BacklogState::default()),
            merge_buffers: Mutex::new(HashMap::new()),
            timings: Mutex::new(HashMap::new()),
            current_frame: AtomicU16::new(0),
            bandwidth,
            partitioner,
            downlink,
            completed_tx: None,
        }
    }

    /// Hand completed frames to the dispatcher through `tx`
    pub fn with_frame_output(mut self, tx: mpsc::Sender<CompletedFrame>) -> Self {
        self.completed_tx = Some(tx);
        self
    }

    #[inline]
    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    #[inline]
    pub fn primary_vehicle_id(&self) -> VehicleId {
        self.settings.primary_vehicle_id
    }

    #[inline]
    pub fn is_primary(&self, vehicle_id: VehicleId) -> bool {
        vehicle_id == self.settings.primary_vehicle_id
    }

    #[inline]
    pub fn current_frame(&self) -> FrameId {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn bandwidth(&self) -> &Arc<BandwidthEstimator> {
        &self.bandwidth
    }

    // ===== Vehicles =====

    /// Mark a vehicle connected, creating its record if needed
    pub fn register_vehicle(&self, vehicle_id: VehicleId) {
        let mut vehicles = self.vehicles.lock();
        vehicles
            .entry(vehicle_id)
            .or_insert_with(|| VehicleState::new(vehicle_id))
            .online = true;
    }

    pub fn mark_offline(&self, vehicle_id: VehicleId) {
        if let Some(state) = self.vehicles.lock().get_mut(&vehicle_id) {
            state.online = false;
        }
    }

    /// Known vehicle ids, ascending
    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.vehicles.lock().keys().copied().collect()
    }

    pub fn is_online(&self, vehicle_id: VehicleId) -> bool {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .is_some_and(|s| s.online)
    }

    pub fn neighbors(&self, vehicle_id: VehicleId) -> Option<BTreeSet<VehicleId>> {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .map(|s| s.neighbors.clone())
    }

    pub fn latest_chunk_id(&self, vehicle_id: VehicleId, frame_id: FrameId) -> ChunkId {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .map_or(0, |s| s.latest_chunk_id(frame_id))
    }

    pub fn is_merged(&self, vehicle_id: VehicleId, frame_id: FrameId) -> bool {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .and_then(|s| s.frame(frame_id))
            .is_some_and(|f| f.merged)
    }

    pub fn object_prediction(&self, vehicle_id: VehicleId) -> Option<String> {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .and_then(|s| s.object_prediction.clone())
    }

    /// Store the latest inference result on every vehicle
    pub fn record_prediction(&self, prediction: &str) {
        for state in self.vehicles.lock().values_mut() {
            state.object_prediction = Some(prediction.to_string());
        }
    }

    // ===== Chunks =====

    /// Insert-if-absent. A stored chunk is never replaced; the only update
    /// allowed is attaching samples to a chunk stored before decode.
    ///
    /// Returns `true` if anything was stored.
    pub fn save_chunk(&self, chunk: SensorDataChunk) -> bool {
        let frame_id = chunk.frame_id;
        let stored = {
            let mut vehicles = self.vehicles.lock();
            Self::store_chunk(&mut vehicles, chunk)
        };
        if stored {
            self.mark_first_arrival(frame_id);
        }
        stored
    }

    /// Store the chunk like [`save_chunk`](Self::save_chunk), then claim its
    /// samples for merging in the same critical section.
    ///
    /// Returns the stored samples on the first claim and `None` afterwards,
    /// so a replayed chunk id is merged at most once and always with the
    /// samples the store kept.
    pub fn claim_chunk(&self, chunk: SensorDataChunk) -> Result<Option<Arc<[f32]>>> {
        let (vehicle_id, frame_id, chunk_id) = (chunk.vehicle_id, chunk.frame_id, chunk.chunk_id);
        let (stored, claimed) = {
            let mut vehicles = self.vehicles.lock();
            let stored = Self::store_chunk(&mut vehicles, chunk);
            let claimed = match vehicles
                .get_mut(&vehicle_id)
                .and_then(|s| s.frames.get_mut(&frame_id))
                .and_then(|f| f.chunks.get_mut(&chunk_id))
            {
                Some(existing) if existing.used => Ok(None),
                Some(existing) => match existing.decoded.clone() {
                    Some(points) => {
                        existing.used = true;
                        Ok(Some(points))
                    }
                    None => Err(CoordinatorError::missing_chunk(vehicle_id, frame_id, chunk_id)),
                },
                None => Err(CoordinatorError::missing_chunk(vehicle_id, frame_id, chunk_id)),
            };
            (stored, claimed)
        };
        if stored {
            self.mark_first_arrival(frame_id);
        }
        claimed
    }

    fn store_chunk(vehicles: &mut BTreeMap<VehicleId, VehicleState>, chunk: SensorDataChunk) -> bool {
        let frame = vehicles
            .entry(chunk.vehicle_id)
            .or_insert_with(|| VehicleState::new(chunk.vehicle_id))
            .frame_mut(chunk.frame_id);
        match frame.chunks.get_mut(&chunk.chunk_id) {
            None => {
                frame.chunks.insert(chunk.chunk_id, chunk);
                true
            }
            Some(existing) if existing.decoded.is_none() && chunk.decoded.is_some() => {
                existing.decoded = chunk.decoded;
                true
            }
            Some(_) => false,
        }
    }

    fn mark_first_arrival(&self, frame_id: FrameId) {
        self.timings
            .lock()
            .entry(frame_id)
            .or_insert_with(Instant::now);
    }

    /// Decoded samples of one stored chunk
    pub fn chunk_points(
        &self,
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
    ) -> Result<Arc<[f32]>> {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .and_then(|s| s.frame(frame_id))
            .and_then(|f| f.chunks.get(&chunk_id))
            .and_then(|c| c.decoded.clone())
            .ok_or_else(|| CoordinatorError::missing_chunk(vehicle_id, frame_id, chunk_id))
    }

    pub fn mark_chunks_used(&self, vehicle_id: VehicleId, frame_id: FrameId, chunk_ids: &[ChunkId]) {
        let mut vehicles = self.vehicles.lock();
        let Some(frame) = vehicles
            .get_mut(&vehicle_id)
            .and_then(|s| s.frames.get_mut(&frame_id))
        else {
            return;
        };
        for id in chunk_ids {
            if let Some(chunk) = frame.chunks.get_mut(id) {
                chunk.used = true;
            }
        }
    }

    /// Mark each vehicle's frame record merged
    pub fn save_merged(&self, frame_id: FrameId, vehicle_ids: &[VehicleId]) {
        let mut vehicles = self.vehicles.lock();
        for &vehicle_id in vehicle_ids {
            vehicles
                .entry(vehicle_id)
                .or_insert_with(|| VehicleState::new(vehicle_id))
                .frame_mut(frame_id)
                .merged = true;
        }
    }

    // ===== Poses =====

    /// Store a pose; for the primary vehicle also mark the frame pose-ready.
    ///
    /// Returns `true` when the pose belongs to the primary vehicle.
    pub fn update_pose(
        &self,
        vehicle_id: VehicleId,
        frame_id: FrameId,
        location: VehicleLocation,
    ) -> bool {
        let primary = self.is_primary(vehicle_id);
        {
            let mut vehicles = self.vehicles.lock();
            vehicles
                .entry(vehicle_id)
                .or_insert_with(|| VehicleState::new(vehicle_id))
                .frame_mut(frame_id)
                .location = Some(location.clone());
        }
        if primary {
            self.backlog.lock().primary_poses.insert(frame_id, location);
        }
        primary
    }

    /// Primary pose for the frame has arrived
    pub fn is_pose_ready(&self, frame_id: FrameId) -> bool {
        self.backlog.lock().primary_poses.contains_key(&frame_id)
    }

    pub fn primary_pose(&self, frame_id: FrameId) -> Option<VehicleLocation> {
        self.backlog.lock().primary_poses.get(&frame_id).cloned()
    }

    pub fn vehicle_location(&self, vehicle_id: VehicleId, frame_id: FrameId) -> Result<VehicleLocation> {
        self.vehicles
            .lock()
            .get(&vehicle_id)
            .and_then(|s| s.location(frame_id).cloned())
            .ok_or_else(|| CoordinatorError::missing_pose(vehicle_id, frame_id))
    }

    // ===== Unmerged backlog =====

    pub fn push_unmerged(&self, vehicle_id: VehicleId, frame_id: FrameId, chunk_id: ChunkId) {
        self.backlog
            .lock()
            .unmerged
            .entry(frame_id)
            .or_default()
            .entry(vehicle_id)
            .or_default()
            .insert(chunk_id);
    }

    /// Take-and-clear the frame's backlog; `None` means nothing pending
    pub fn pop_unmerged(&self, frame_id: FrameId) -> Option<UnmergedBacklog> {
        self.backlog
            .lock()
            .unmerged
            .remove(&frame_id)
            .filter(|b| !b.is_empty())
    }

    /// Primary pose if the frame is pose-ready, otherwise park the chunk in
    /// the backlog. Both happen under the backlog lock, so a chunk can never
    /// be parked after the frame's cleanup drained the backlog.
    pub fn primary_pose_or_defer(
        &self,
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
    ) -> Option<VehicleLocation> {
        let mut backlog = self.backlog.lock();
        if let Some(pose) = backlog.primary_poses.get(&frame_id) {
            return Some(pose.clone());
        }
        backlog
            .unmerged
            .entry(frame_id)
            .or_default()
            .entry(vehicle_id)
            .or_default()
            .insert(chunk_id);
        None
    }

    /// Pop the backlog, but only once the primary pose is in
    pub fn take_backlog_when_ready(
        &self,
        frame_id: FrameId,
    ) -> Option<(VehicleLocation, UnmergedBacklog)> {
        let mut backlog = self.backlog.lock();
        let pose = backlog.primary_poses.get(&frame_id)?.clone();
        let pending = backlog.unmerged.remove(&frame_id).filter(|b| !b.is_empty())?;
        Some((pose, pending))
    }

    // ===== Merge buffers =====

    /// Get-or-create the frame's buffer; the same instance on every call
    pub fn merge_buffer(&self, frame_id: FrameId) -> Arc<MergeBuffer> {
        let mut buffers = self.merge_buffers.lock();
        Arc::clone(buffers.entry(frame_id).or_insert_with(|| {
            debug!(frame_id, capacity = self.settings.merge_buffer_capacity, "Allocating merge buffer");
            Arc::new(MergeBuffer::with_capacity(
                frame_id,
                self.settings.merge_buffer_capacity,
            ))
        }))
    }

    /// Reserve a disjoint `[offset, offset + size)` range in the frame's buffer
    pub fn allocate_offset(&self, frame_id: FrameId, size: usize) -> Result<Range<usize>> {
        self.merge_buffer(frame_id).allocate(size)
    }

    pub fn allocate_region(&self, frame_id: FrameId, size: usize) -> Result<MergeRegion> {
        let buffer = self.merge_buffer(frame_id);
        let region = buffer.allocate_region(size)?;
        observability::record_merge_buffer_fill(buffer.offset(), buffer.capacity());
        Ok(region)
    }

    /// Samples written so far for a frame that has a buffer
    pub fn merged_points(&self, frame_id: FrameId) -> Result<Vec<f32>> {
        self.merge_buffers
            .lock()
            .get(&frame_id)
            .cloned()
            .map(|b| b.snapshot())
            .ok_or(CoordinatorError::UnknownFrame { frame_id })
    }

    // ===== Completion & partitioning =====

    /// Run the completion check for an arbitrary frame
    pub fn check_completion(&self, frame_id: FrameId) -> Result<bool> {
        let mut vehicles = self.vehicles.lock();
        self.settings.completion.check(&mut vehicles, frame_id)
    }

    /// Check the current frame; when complete, send `D` to everyone, refresh
    /// the partitioning, emit the merged frame and advance.
    ///
    /// Returns the frame that just completed.
    #[instrument(name = "coordinator_should_run_detection", skip(self))]
    pub fn should_run_object_detection(&self) -> Result<Option<FrameId>> {
        let frame_id = self.current_frame();
        if !self.check_completion(frame_id)? {
            return Ok(None);
        }

        let vehicle_ids = self.vehicle_ids();
        info!(frame_id, vehicles = vehicle_ids.len(), "Frame complete");

        for &vehicle_id in &vehicle_ids {
            self.send_downlink(vehicle_id, DownlinkMessage::finish(frame_id));
        }

        if let Err(e) = self.recompute_partitioning(frame_id) {
            warn!(frame_id, error = %e, "Partition refresh failed, keeping previous neighbours");
        }

        let latency_ms = self
            .timings
            .lock()
            .remove(&frame_id)
            .map(|started| started.elapsed().as_secs_f64() * 1000.0);
        observability::record_frame_completed(frame_id, vehicle_ids.len(), latency_ms);
        self.emit_completed(frame_id, vehicle_ids, latency_ms);

        self.current_frame
            .store(frame_id.wrapping_add(1), Ordering::Release);
        Ok(Some(frame_id))
    }

    /// Gather poses and bandwidths, ask the partitioner, install the new
    /// neighbour sets and queue an `M` message per vehicle.
    #[instrument(name = "coordinator_recompute_partitioning", skip(self))]
    pub fn recompute_partitioning(&self, frame_id: FrameId) -> Result<()> {
        let (ids, poses) = {
            let vehicles = self.vehicles.lock();
            let mut ids = Vec::with_capacity(vehicles.len());
            let mut poses = Vec::with_capacity(vehicles.len());
            for (&id, state) in vehicles.iter() {
                let pose = state
                    .location(frame_id)
                    .cloned()
                    .ok_or_else(|| CoordinatorError::missing_pose(id, frame_id))?;
                ids.push(id);
                poses.push(pose);
            }
            (ids, poses)
        };

        let bandwidths: Vec<f64> = ids
            .iter()
            .map(|&id| self.bandwidth.estimate_mbps(id))
            .collect();
        let smoothed: Vec<Option<f64>> = ids
            .iter()
            .map(|&id| self.bandwidth.estimate_kbps(id))
            .collect();

        let decision = self.partitioner.partition(&poses, &bandwidths)?;
        let neighbor_sets = algorithms::neighbor_sets(&ids, &decision)?;

        {
            let mut vehicles = self.vehicles.lock();
            for ((id, neighbors), kbps) in ids.iter().zip(neighbor_sets).zip(&smoothed) {
                if let Some(state) = vehicles.get_mut(id) {
                    state.install_neighbors(neighbors);
                    state.bandwidth_kbps = *kbps;
                }
            }
        }

        for (index, &vehicle_id) in ids.iter().enumerate() {
            let boundaries = decision
                .decisions
                .get(index)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let message = DownlinkMessage::decision(frame_id, boundaries)?;
            self.send_downlink(vehicle_id, message);
        }

        debug!(frame_id, vehicles = ids.len(), pairs = decision.neighbor_pairs.len(), "Partitioning refreshed");
        Ok(())
    }

    fn send_downlink(&self, vehicle_id: VehicleId, message: DownlinkMessage) {
        let kind = message.kind.label();
        match self.downlink.send(vehicle_id, message) {
            Ok(()) => observability::record_downlink_sent(kind, true),
            Err(e) => {
                warn!(vehicle_id, kind, error = %e, "Downlink send failed");
                observability::record_downlink_sent(kind, false);
            }
        }
    }

    fn emit_completed(&self, frame_id: FrameId, vehicles: Vec<VehicleId>, latency_ms: Option<f64>) {
        let Some(tx) = &self.completed_tx else {
            return;
        };
        let points = self
            .merge_buffers
            .lock()
            .get(&frame_id)
            .cloned()
            .map(|b| b.snapshot())
            .unwrap_or_default();
        let frame = CompletedFrame {
            frame_id,
            vehicles,
            points: points.into(),
            latency_ms,
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(frame_id, "Frame output queue full, dropping merged frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(frame_id, "Frame output closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::GabrielPartitioner;
    use crate::algorithms::PartitionStrategy;
    use contracts::{BandwidthConfig, ContractError, DownlinkKind, PartitionDecision, PartitionError};

    #[derive(Default)]
    struct RecordingDownlink {
        sent: Mutex<Vec<(VehicleId, DownlinkMessage)>>,
    }

    impl RecordingDownlink {
        fn kinds_for(&self, vehicle_id: VehicleId) -> Vec<DownlinkKind> {
            self.sent
                .lock()
                .iter()
                .filter(|(v, _)| *v == vehicle_id)
                .map(|(_, m)| m.kind)
                .collect()
        }
    }

    impl DownlinkSender for RecordingDownlink {
        fn send(&self, vehicle_id: VehicleId, message: DownlinkMessage) -> std::result::Result<(), ContractError> {
            self.sent.lock().push((vehicle_id, message));
            Ok(())
        }
    }

    /// Everyone is everyone's neighbour
    struct CompleteGraph;

    impl Partitioner for CompleteGraph {
        fn partition(
            &self,
            poses: &[VehicleLocation],
            _bandwidths_mbps: &[f64],
        ) -> std::result::Result<PartitionDecision, PartitionError> {
            let n = poses.len();
            let mut decision = PartitionDecision {
                decisions: vec![Vec::new(); n],
                ..Default::default()
            };
            for i in 0..n {
                for j in (i + 1)..n {
                    decision.neighbor_pairs.push((i, j));
                    decision.decisions[i].push(vec![j as f32]);
                    decision.decisions[j].push(vec![i as f32]);
                }
            }
            Ok(decision)
        }
    }

    fn coordinator_with(
        capacity: usize,
        partitioner: Arc<dyn Partitioner>,
    ) -> (SensorDataCoordinator, Arc<RecordingDownlink>) {
        let downlink = Arc::new(RecordingDownlink::default());
        let settings = CoordinatorSettings {
            primary_vehicle_id: 1,
            merge_buffer_capacity: capacity,
            completion: CompletionChecker::new(4, 5),
        };
        let coordinator = SensorDataCoordinator::new(
            settings,
            Arc::new(BandwidthEstimator::new(BandwidthConfig::default())),
            partitioner,
            downlink.clone(),
        );
        (coordinator, downlink)
    }

    fn pose(x: f32, y: f32) -> VehicleLocation {
        VehicleLocation::new(vec![x, y, 0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn test_save_chunk_never_overwrites() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        assert!(c.save_chunk(SensorDataChunk::decoded(2, 0, 1, vec![1.0; 4])));
        assert!(!c.save_chunk(SensorDataChunk::decoded(2, 0, 1, vec![9.0; 8])));
        assert_eq!(&*c.chunk_points(2, 0, 1).unwrap(), &[1.0; 4]);
    }

    #[test]
    fn test_save_chunk_attaches_samples_once() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        let raw = SensorDataChunk::compressed(2, 0, 1, bytes::Bytes::from_static(b"xx"));
        assert!(c.save_chunk(raw.clone()));
        assert!(c.chunk_points(2, 0, 1).is_err());

        assert!(c.save_chunk(raw.clone().with_decoded(vec![2.0; 4])));
        assert!(!c.save_chunk(raw.with_decoded(vec![3.0; 4])));
        assert_eq!(&*c.chunk_points(2, 0, 1).unwrap(), &[2.0; 4]);
    }

    #[test]
    fn test_claim_chunk_once_with_stored_samples() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        let first = c
            .claim_chunk(SensorDataChunk::decoded(2, 0, 1, vec![1.0; 4]))
            .unwrap();
        assert_eq!(first.as_deref(), Some(&[1.0; 4][..]));
        assert!(c
            .claim_chunk(SensorDataChunk::decoded(2, 0, 1, vec![9.0; 4]))
            .unwrap()
            .is_none());
        assert_eq!(&*c.chunk_points(2, 0, 1).unwrap(), &[1.0; 4]);
    }

    #[test]
    fn test_claim_after_decode_uses_stored_chunk() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        let raw = SensorDataChunk::compressed(2, 0, 1, bytes::Bytes::from_static(b"xx"));
        assert!(matches!(
            c.claim_chunk(raw.clone()),
            Err(CoordinatorError::MissingChunk { chunk_id: 1, .. })
        ));
        assert!(c.save_chunk(raw.clone().with_decoded(vec![2.0; 4])));
        let claimed = c.claim_chunk(raw.with_decoded(vec![2.0; 4])).unwrap();
        assert_eq!(claimed.as_deref(), Some(&[2.0; 4][..]));
    }

    #[test]
    fn test_pop_unmerged_exactly_once() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        c.push_unmerged(2, 5, 1);
        c.push_unmerged(2, 5, 2);
        c.push_unmerged(3, 5, 1);

        let backlog = c.pop_unmerged(5).unwrap();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[&2], [1, 2].into_iter().collect());
        assert!(c.pop_unmerged(5).is_none());
    }

    #[test]
    fn test_defer_until_primary_pose() {
        let (c, _) = coordinator_with(64, Arc::new(CompleteGraph));
        assert!(c.primary_pose_or_defer(2, 5, 1).is_none());
        assert!(c.take_backlog_when_ready(5).is_none());

        assert!(!c.update_pose(2, 5, pose(1.0, 0.0)));
        assert!(!c.is_pose_ready(5));
        assert!(c.update_pose(1, 5, pose(0.0, 0.0)));
        assert!(c.is_pose_ready(5));

        let (primary, backlog) = c.take_backlog_when_ready(5).unwrap();
        assert_eq!(primary, pose(0.0, 0.0));
        assert_eq!(backlog[&2], [1].into_iter().collect());
        assert!(c.take_backlog_when_ready(5).is_none());

        // once ready, new chunks go straight through
        assert_eq!(c.primary_pose_or_defer(3, 5, 1), Some(pose(0.0, 0.0)));
        assert!(c.pop_unmerged(5).is_none());
    }

    #[test]
    fn test_merge_buffer_is_lazily_shared() {
        let (c, _) = coordinator_with(32, Arc::new(CompleteGraph));
        assert!(matches!(
            c.merged_points(4),
            Err(CoordinatorError::UnknownFrame { frame_id: 4 })
        ));
        let a = c.merge_buffer(4);
        let b = c.merge_buffer(4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.allocate_offset(4, 8).unwrap(), 0..8);
        assert_eq!(c.allocate_offset(4, 8).unwrap(), 8..16);
        assert_eq!(c.merge_buffer(5).offset(), 0);
    }

    #[test]
    fn test_missing_pose_is_explicit() {
        let (c, _) = coordinator_with(32, Arc::new(CompleteGraph));
        assert!(matches!(
            c.vehicle_location(7, 0),
            Err(CoordinatorError::MissingPose { vehicle_id: 7, frame_id: 0 })
        ));
    }

    #[test]
    fn test_completion_sends_finish_and_decisions() {
        let (c, downlink) = coordinator_with(32, Arc::new(CompleteGraph));
        c.register_vehicle(1);
        c.register_vehicle(2);
        c.update_pose(1, 0, pose(0.0, 0.0));
        c.update_pose(2, 0, pose(10.0, 0.0));

        assert_eq!(c.should_run_object_detection().unwrap(), None);

        c.save_merged(0, &[1, 2]);
        assert_eq!(c.should_run_object_detection().unwrap(), Some(0));
        assert_eq!(c.current_frame(), 1);
        assert_eq!(
            downlink.kinds_for(1),
            vec![DownlinkKind::Finish, DownlinkKind::Decision]
        );
        assert_eq!(c.neighbors(1).unwrap(), [2].into_iter().collect());
        assert_eq!(c.neighbors(2).unwrap(), [1].into_iter().collect());
    }

    #[test]
    fn test_completion_uses_neighbor_quota_after_first_frame() {
        let (c, _) = coordinator_with(32, Arc::new(CompleteGraph));
        for v in [1, 2] {
            c.update_pose(v, 0, pose(v as f32, 0.0));
            c.save_merged(0, &[v]);
        }
        assert_eq!(c.should_run_object_detection().unwrap(), Some(0));

        c.save_chunk(SensorDataChunk::decoded(1, 1, 1, vec![]));
        c.save_chunk(SensorDataChunk::decoded(2, 1, 2, vec![]));
        assert_eq!(c.should_run_object_detection().unwrap(), None);

        c.save_chunk(SensorDataChunk::decoded(2, 1, 3, vec![]));
        assert_eq!(c.should_run_object_detection().unwrap(), Some(1));
    }

    #[test]
    fn test_completed_frame_is_emitted() {
        let (c, _) = coordinator_with(16, Arc::new(CompleteGraph));
        let (tx, mut rx) = mpsc::channel(4);
        let c = c.with_frame_output(tx);

        c.update_pose(1, 0, pose(0.0, 0.0));
        c.save_chunk(SensorDataChunk::decoded(1, 0, 5, vec![1.0, 2.0, 3.0, 4.0]));
        c.allocate_region(0, 4).unwrap().copy_from(&[1.0, 2.0, 3.0, 4.0]);
        c.save_merged(0, &[1]);

        assert_eq!(c.should_run_object_detection().unwrap(), Some(0));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.vehicles, vec![1]);
        assert_eq!(&*frame.points, &[1.0, 2.0, 3.0, 4.0]);
        assert!(frame.latency_ms.is_some());
    }

    #[test]
    fn test_partition_failure_keeps_frame_complete() {
        let partitioner = Arc::new(GabrielPartitioner::new(PartitionStrategy::Basic, 100.0));
        let (c, downlink) = coordinator_with(16, partitioner);
        c.register_vehicle(1);
        c.register_vehicle(2);
        c.update_pose(1, 0, pose(0.0, 0.0));
        c.save_merged(0, &[1, 2]);

        // vehicle 2 has no pose at frame 0: no decisions, but D still goes out
        assert_eq!(c.should_run_object_detection().unwrap(), Some(0));
        assert_eq!(downlink.kinds_for(2), vec![DownlinkKind::Finish]);
        assert!(c.neighbors(2).unwrap().is_empty());
    }

    #[test]
    fn test_online_flag_and_prediction() {
        let (c, _) = coordinator_with(16, Arc::new(CompleteGraph));
        c.register_vehicle(3);
        assert!(c.is_online(3));
        c.mark_offline(3);
        assert!(!c.is_online(3));

        c.record_prediction("points=0");
        assert_eq!(c.object_prediction(3).as_deref(), Some("points=0"));
    }
}
