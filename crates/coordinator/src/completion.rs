//! Frame-completion check over the neighbour graph.
//!
//! A frame is complete when every neighbour pair has uploaded enough chunks
//! between them (`latest_chunk(a) + latest_chunk(b) >= quota`). Without a
//! neighbour graph, or once anyone reports the full-frame chunk id, the check
//! falls back to "every vehicle has merged this frame or a later one".
//!
//! The only state kept across calls is each vehicle's `pending_neighbors`.
//! A vehicle's walk stops at its first unsatisfied neighbour; the caller
//! polls again after the next merge, so a `false` only delays completion.

use std::collections::BTreeMap;

use contracts::{ChunkId, CoordinatorConfig, FrameId, VehicleId};
use tracing::trace;

use crate::{CoordinatorError, Result, VehicleState};

#[derive(Debug, Clone, Copy)]
pub struct CompletionChecker {
    quota: u32,
    full_frame_chunk_id: ChunkId,
}

impl CompletionChecker {
    pub fn new(quota: u32, full_frame_chunk_id: ChunkId) -> Self {
        Self {
            quota,
            full_frame_chunk_id,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.completion_quota, config.full_frame_chunk_id)
    }

    /// Evaluate `frame_id`, updating the pending-neighbour working sets.
    ///
    /// Fails only when a neighbour id has no vehicle record.
    pub fn check(
        &self,
        vehicles: &mut BTreeMap<VehicleId, VehicleState>,
        frame_id: FrameId,
    ) -> Result<bool> {
        if vehicles.is_empty() {
            return Ok(false);
        }
        if vehicles.values().any(|v| v.neighbors.is_empty()) {
            return Ok(Self::full_frame_check(vehicles, frame_id));
        }

        for state in vehicles.values_mut() {
            state.reseed_pending();
        }

        let ids: Vec<VehicleId> = vehicles.keys().copied().collect();
        let mut all_walks_finished = true;

        for vehicle_id in ids {
            let Some(state) = vehicles.get(&vehicle_id) else {
                continue;
            };
            let own_chunk = state.latest_chunk_id(frame_id);
            let pending: Vec<VehicleId> = state.pending_neighbors.iter().copied().collect();

            for neighbor_id in pending {
                let neighbor_chunk = vehicles
                    .get(&neighbor_id)
                    .ok_or(CoordinatorError::UnknownVehicle {
                        vehicle_id: neighbor_id,
                    })?
                    .latest_chunk_id(frame_id);

                if own_chunk == self.full_frame_chunk_id
                    || neighbor_chunk == self.full_frame_chunk_id
                {
                    return Ok(Self::full_frame_check(vehicles, frame_id));
                }

                if u32::from(own_chunk) + u32::from(neighbor_chunk) >= self.quota {
                    mark_edge_satisfied(vehicles, vehicle_id, neighbor_id);
                } else {
                    trace!(
                        frame_id,
                        vehicle_id,
                        neighbor_id,
                        own_chunk,
                        neighbor_chunk,
                        "Neighbour pair below quota"
                    );
                    all_walks_finished = false;
                    break;
                }
            }
        }

        Ok(all_walks_finished && vehicles.values().all(|v| v.pending_neighbors.is_empty()))
    }

    /// Every vehicle has merged `frame_id` or something newer
    fn full_frame_check(vehicles: &BTreeMap<VehicleId, VehicleState>, frame_id: FrameId) -> bool {
        vehicles
            .values()
            .all(|v| v.latest_merged_frame_id().is_some_and(|id| id >= frame_id))
    }
}

/// Drop the edge from both working sets under the caller's single lock
fn mark_edge_satisfied(
    vehicles: &mut BTreeMap<VehicleId, VehicleState>,
    a: VehicleId,
    b: VehicleId,
) {
    if let Some(state) = vehicles.get_mut(&a) {
        state.pending_neighbors.remove(&b);
    }
    if let Some(state) = vehicles.get_mut(&b) {
        state.pending_neighbors.remove(&a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SensorDataChunk;

    const FRAME: FrameId = 0;

    fn checker() -> CompletionChecker {
        CompletionChecker::new(4, 5)
    }

    /// Vehicles with chunk ids `1..=latest` each at FRAME, marked merged
    fn fleet(
        latest: &[(VehicleId, ChunkId)],
        graph: &[(VehicleId, &[VehicleId])],
    ) -> BTreeMap<VehicleId, VehicleState> {
        let mut vehicles = BTreeMap::new();
        for &(id, max_chunk) in latest {
            let mut state = VehicleState::new(id);
            let frame = state.frame_mut(FRAME);
            for chunk in 1..=max_chunk {
                frame
                    .chunks
                    .insert(chunk, SensorDataChunk::decoded(id, FRAME, chunk, vec![]));
            }
            frame.merged = max_chunk > 0;
            vehicles.insert(id, state);
        }
        for &(id, neighbors) in graph {
            if let Some(state) = vehicles.get_mut(&id) {
                state.install_neighbors(neighbors.iter().copied().collect());
            }
        }
        vehicles
    }

    const FIVE_VEHICLE_GRAPH: &[(VehicleId, &[VehicleId])] = &[
        (1, &[2, 3, 4]),
        (2, &[1, 3, 4, 5]),
        (3, &[1, 2, 5]),
        (4, &[1, 2, 5]),
        (5, &[2, 3, 4]),
    ];

    const RING: &[(VehicleId, &[VehicleId])] = &[
        (1, &[2, 5]),
        (2, &[1, 3]),
        (3, &[2, 4]),
        (4, &[3, 5]),
        (5, &[4, 1]),
    ];

    #[test]
    fn test_unfinished_when_a_pair_is_short() {
        let mut vehicles = fleet(&[(1, 2), (2, 1), (3, 0), (4, 3), (5, 2)], FIVE_VEHICLE_GRAPH);
        assert!(!checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_finished_when_every_pair_meets_quota() {
        let mut vehicles = fleet(&[(1, 4), (2, 4), (3, 0), (4, 3), (5, 4)], FIVE_VEHICLE_GRAPH);
        assert!(checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_ring_with_exact_quota_completes_first_call() {
        let mut vehicles = fleet(&[(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)], RING);
        assert!(checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_short_pair_completes_after_increment() {
        let mut vehicles = fleet(&[(1, 3), (2, 2), (3, 2), (4, 2), (5, 1)], RING);
        let checker = checker();
        assert!(!checker.check(&mut vehicles, FRAME).unwrap());

        let state = vehicles.get_mut(&5).unwrap();
        state
            .frame_mut(FRAME)
            .chunks
            .insert(2, SensorDataChunk::decoded(5, FRAME, 2, vec![]));

        assert!(checker.check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_complete_is_stable_on_unchanged_state() {
        let mut vehicles = fleet(&[(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)], RING);
        let checker = checker();
        for _ in 0..3 {
            assert!(checker.check(&mut vehicles, FRAME).unwrap());
        }
    }

    #[test]
    fn test_full_frame_sentinel_requires_all_merged() {
        let mut vehicles = fleet(&[(1, 5), (2, 0), (3, 5), (4, 5), (5, 5)], FIVE_VEHICLE_GRAPH);
        assert!(!checker().check(&mut vehicles, FRAME).unwrap());

        let mut vehicles = fleet(&[(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)], FIVE_VEHICLE_GRAPH);
        assert!(checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_no_neighbors_falls_back_to_full_frame() {
        let mut vehicles = fleet(&[(1, 1), (2, 1)], &[]);
        assert!(checker().check(&mut vehicles, FRAME).unwrap());

        vehicles.get_mut(&2).unwrap().frame_mut(FRAME).merged = false;
        assert!(!checker().check(&mut vehicles, FRAME).unwrap());
        // a later merged frame also satisfies an earlier target
        vehicles.get_mut(&2).unwrap().frame_mut(FRAME + 1).merged = true;
        assert!(checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_empty_fleet_is_not_complete() {
        let mut vehicles = BTreeMap::new();
        assert!(!checker().check(&mut vehicles, FRAME).unwrap());
    }

    #[test]
    fn test_unknown_neighbor_is_an_error() {
        let mut vehicles = fleet(&[(1, 2)], &[(1, &[9])]);
        let err = checker().check(&mut vehicles, FRAME).unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownVehicle { vehicle_id: 9 }));
    }

    #[test]
    fn test_pending_stays_subset_of_neighbors() {
        let mut vehicles = fleet(&[(1, 3), (2, 2), (3, 2), (4, 2), (5, 1)], RING);
        let _ = checker().check(&mut vehicles, FRAME).unwrap();
        for state in vehicles.values() {
            assert!(state.pending_neighbors.is_subset(&state.neighbors));
        }
    }
}
