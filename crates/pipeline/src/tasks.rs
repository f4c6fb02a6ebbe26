//! Task bodies. Each runs on a worker thread and returns a typed output the
//! coordinating loop uses to decide follow-on work.

use std::sync::Arc;

use contracts::{
    ChunkId, FrameId, MergeError, MergeRequest, ObjectDetector, PointCloudCodec,
    PointCloudMerger, SensorDataChunk, Task, VehicleId, VehicleLocation, POINT_STRIDE,
};
use coordinator::{CoordinatorError, Result, SensorDataCoordinator};
use tracing::{debug, instrument, warn};

/// Result of one task body
#[derive(Debug)]
pub enum TaskOutput {
    /// `stored` is false when the chunk id already had samples
    Decoded { chunk: SensorDataChunk, stored: bool },
    LocationUpdated {
        vehicle_id: VehicleId,
        frame_id: FrameId,
        primary: bool,
    },
    Merged(MergeOutcome),
    Detected { frame_id: FrameId, prediction: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Samples written for these vehicles
    Written {
        frame_id: FrameId,
        vehicles: Vec<VehicleId>,
        samples: usize,
    },
    /// Primary pose missing; chunk parked in the backlog
    Deferred {
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
    },
    /// Chunk id already claimed by an earlier merge
    Duplicate {
        vehicle_id: VehicleId,
        frame_id: FrameId,
        chunk_id: ChunkId,
    },
    /// Cleanup found nothing to drain
    Idle { frame_id: FrameId },
}

/// Everything a task body may touch
pub struct TaskContext {
    pub coordinator: Arc<SensorDataCoordinator>,
    pub codec: Arc<dyn PointCloudCodec>,
    pub merger: Arc<dyn PointCloudMerger>,
    pub detector: Arc<dyn ObjectDetector>,
}

impl TaskContext {
    pub fn execute(&self, task: Task) -> Result<TaskOutput> {
        match task {
            Task::Decode(chunk) => self.decode(chunk),
            Task::LocationUpdate {
                vehicle_id,
                frame_id,
                location,
            } => Ok(self.update_location(vehicle_id, frame_id, location)),
            Task::Merge(MergeRequest::Immediate(chunk)) => {
                self.merge_chunk(chunk).map(TaskOutput::Merged)
            }
            Task::Merge(MergeRequest::Cleanup { frame_id }) => {
                self.merge_backlog(frame_id).map(TaskOutput::Merged)
            }
            Task::ObjectDetection { frame_id } => self.detect(frame_id),
        }
    }

    #[instrument(
        name = "task_decode",
        skip_all,
        fields(vehicle_id = chunk.vehicle_id, frame_id = chunk.frame_id, chunk_id = chunk.chunk_id)
    )]
    fn decode(&self, chunk: SensorDataChunk) -> Result<TaskOutput> {
        let bytes = chunk
            .compressed
            .clone()
            .ok_or_else(|| CoordinatorError::missing_chunk(chunk.vehicle_id, chunk.frame_id, chunk.chunk_id))?;
        let points = self.codec.decode(&bytes)?;
        debug!(bytes = bytes.len(), samples = points.len(), "Chunk decoded");

        let chunk = chunk.with_decoded(points);
        let stored = self.coordinator.save_chunk(chunk.clone());
        Ok(TaskOutput::Decoded { chunk, stored })
    }

    fn update_location(
        &self,
        vehicle_id: VehicleId,
        frame_id: FrameId,
        location: VehicleLocation,
    ) -> TaskOutput {
        let primary = self.coordinator.update_pose(vehicle_id, frame_id, location);
        TaskOutput::LocationUpdated {
            vehicle_id,
            frame_id,
            primary,
        }
    }

    /// Immediate mode: one decoded chunk
    #[instrument(
        name = "task_merge",
        skip_all,
        fields(vehicle_id = chunk.vehicle_id, frame_id = chunk.frame_id, chunk_id = chunk.chunk_id)
    )]
    fn merge_chunk(&self, chunk: SensorDataChunk) -> Result<MergeOutcome> {
        let (vehicle_id, frame_id, chunk_id) = (chunk.vehicle_id, chunk.frame_id, chunk.chunk_id);
        let Some(points) = self.coordinator.claim_chunk(chunk)? else {
            debug!("Chunk already merged, replay ignored");
            return Ok(MergeOutcome::Duplicate {
                vehicle_id,
                frame_id,
                chunk_id,
            });
        };

        if self.coordinator.is_primary(vehicle_id) {
            if points.len() % POINT_STRIDE != 0 {
                return Err(MergeError::MisalignedPoints {
                    len: points.len(),
                    stride: POINT_STRIDE,
                }
                .into());
            }
            let region = self.coordinator.allocate_region(frame_id, points.len())?;
            region.copy_from(&points);
        } else {
            let Some(primary_pose) =
                self.coordinator.primary_pose_or_defer(vehicle_id, frame_id, chunk_id)
            else {
                debug!("Primary pose not ready, chunk deferred");
                return Ok(MergeOutcome::Deferred {
                    vehicle_id,
                    frame_id,
                    chunk_id,
                });
            };
            let own_pose = self.coordinator.vehicle_location(vehicle_id, frame_id)?;
            self.merger.validate(&primary_pose, &points, &own_pose)?;
            let region = self.coordinator.allocate_region(frame_id, points.len())?;
            self.merger
                .merge_into(&region, &primary_pose, &points, &own_pose)?;
        }

        self.coordinator.save_merged(frame_id, &[vehicle_id]);
        Ok(MergeOutcome::Written {
            frame_id,
            vehicles: vec![vehicle_id],
            samples: points.len(),
        })
    }

    /// Cleanup mode: drain the frame's backlog, one batch per vehicle.
    ///
    /// A vehicle whose batch fails is logged and skipped; the rest still merge.
    #[instrument(name = "task_merge_cleanup", skip(self))]
    fn merge_backlog(&self, frame_id: FrameId) -> Result<MergeOutcome> {
        let Some((primary_pose, backlog)) = self.coordinator.take_backlog_when_ready(frame_id)
        else {
            return Ok(MergeOutcome::Idle { frame_id });
        };

        let mut vehicles = Vec::with_capacity(backlog.len());
        let mut samples = 0;
        for (vehicle_id, chunk_ids) in backlog {
            let chunk_ids: Vec<ChunkId> = chunk_ids.into_iter().collect();
            match self.merge_vehicle_batch(frame_id, vehicle_id, &chunk_ids, &primary_pose) {
                Ok(written) => {
                    self.coordinator
                        .mark_chunks_used(vehicle_id, frame_id, &chunk_ids);
                    vehicles.push(vehicle_id);
                    samples += written;
                }
                Err(e) => {
                    warn!(vehicle_id, chunks = ?chunk_ids, error = %e, "Backlog merge failed for vehicle");
                }
            }
        }

        self.coordinator.save_merged(frame_id, &vehicles);
        debug!(vehicles = vehicles.len(), samples, "Backlog merged");
        Ok(MergeOutcome::Written {
            frame_id,
            vehicles,
            samples,
        })
    }

    fn merge_vehicle_batch(
        &self,
        frame_id: FrameId,
        vehicle_id: VehicleId,
        chunk_ids: &[ChunkId],
        primary_pose: &VehicleLocation,
    ) -> Result<usize> {
        let mut points = Vec::new();
        for &chunk_id in chunk_ids {
            let chunk = self.coordinator.chunk_points(vehicle_id, frame_id, chunk_id)?;
            points.extend_from_slice(&chunk);
        }
        let own_pose = self.coordinator.vehicle_location(vehicle_id, frame_id)?;
        self.merger.validate(primary_pose, &points, &own_pose)?;
        let region = self.coordinator.allocate_region(frame_id, points.len())?;
        self.merger
            .merge_into(&region, primary_pose, &points, &own_pose)?;
        Ok(points.len())
    }

    #[instrument(name = "task_object_detection", skip(self))]
    fn detect(&self, frame_id: FrameId) -> Result<TaskOutput> {
        let points = self.coordinator.merged_points(frame_id)?;
        let prediction = self.detector.detect(&points)?;
        self.coordinator.record_prediction(&prediction);
        Ok(TaskOutput::Detected {
            frame_id,
            prediction,
        })
    }
}
