//! Coordinating loop: owns the in-flight set and is the only place that
//! schedules follow-on work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ContractError, FrameId, MergeRequest, Task, TaskSink};
use observability::{MetricsSummary, PipelineMetricsAggregator};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::{MergeOutcome, PipelineError, TaskContext, TaskOutput};

/// Fire-and-forget submission into the pipeline queue
#[derive(Clone)]
pub struct TaskSubmitter {
    tx: async_channel::Sender<Task>,
}

impl TaskSink for TaskSubmitter {
    fn submit(&self, task: Task) -> Result<(), ContractError> {
        self.tx.try_send(task).map_err(|e| ContractError::TaskRejected {
            message: format!("{} task: pipeline stopped", e.into_inner().kind()),
        })
    }
}

/// Stop switch and join handle for a running pipeline
pub struct PipelineHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<MetricsSummary>,
}

impl PipelineHandle {
    /// Stop accepting work, let in-flight tasks finish, return the run summary
    #[instrument(name = "pipeline_stop", skip(self))]
    pub async fn stop(self) -> Result<MetricsSummary, PipelineError> {
        let _ = self.stop_tx.send(true);
        self.join.await.map_err(|e| PipelineError::Loop {
            message: e.to_string(),
        })
    }
}

/// Spawn the coordinating loop on the current runtime
pub fn spawn_pipeline(context: TaskContext, worker_threads: usize) -> (TaskSubmitter, PipelineHandle) {
    let (tx, rx) = async_channel::unbounded();
    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = TaskScheduler::new(Arc::new(context), rx, stop_rx, worker_threads);
    let join = tokio::spawn(scheduler.run());
    (TaskSubmitter { tx }, PipelineHandle { stop_tx, join })
}

struct TaskReport {
    kind: &'static str,
    frame_id: FrameId,
    elapsed: Duration,
    result: Result<TaskOutput, PipelineError>,
}

struct TaskScheduler {
    context: Arc<TaskContext>,
    rx: async_channel::Receiver<Task>,
    stop_rx: watch::Receiver<bool>,
    workers: Arc<Semaphore>,
    worker_threads: usize,
    pending: JoinSet<TaskReport>,
    /// In-flight completion check, at most one
    completion: JoinSet<coordinator::Result<Option<FrameId>>>,
    recheck: bool,
    aggregator: PipelineMetricsAggregator,
}

impl TaskScheduler {
    fn new(
        context: Arc<TaskContext>,
        rx: async_channel::Receiver<Task>,
        stop_rx: watch::Receiver<bool>,
        worker_threads: usize,
    ) -> Self {
        let worker_threads = worker_threads.max(1);
        Self {
            context,
            rx,
            stop_rx,
            workers: Arc::new(Semaphore::new(worker_threads)),
            worker_threads,
            pending: JoinSet::new(),
            completion: JoinSet::new(),
            recheck: false,
            aggregator: PipelineMetricsAggregator::new(),
        }
    }

    #[instrument(name = "pipeline_run", skip(self), fields(workers = self.worker_threads))]
    async fn run(mut self) -> MetricsSummary {
        info!("Task pipeline started");
        let mut stopping = false;

        loop {
            if stopping && self.pending.is_empty() && self.completion.is_empty() {
                break;
            }
            tokio::select! {
                _ = self.stop_rx.changed(), if !stopping => {
                    stopping = true;
                    self.drain_queue();
                }
                task = self.rx.recv(), if !stopping => match task {
                    Ok(task) => self.spawn(task),
                    Err(_) => {
                        debug!("All submitters dropped");
                        stopping = true;
                    }
                },
                Some(joined) = self.pending.join_next(), if !self.pending.is_empty() => {
                    self.on_complete(joined);
                }
                Some(checked) = self.completion.join_next(), if !self.completion.is_empty() => {
                    self.on_completion_checked(checked);
                }
                else => break,
            }
        }

        let summary = self.aggregator.summary();
        info!(
            tasks = summary.total_tasks,
            failed = summary.failed_tasks,
            frames = summary.frames_completed,
            "Task pipeline stopped"
        );
        summary
    }

    /// Close the queue and hand everything still buffered to the workers
    fn drain_queue(&mut self) {
        self.rx.close();
        let mut drained = 0usize;
        while let Ok(task) = self.rx.try_recv() {
            self.spawn(task);
            drained += 1;
        }
        info!(drained, in_flight = self.pending.len(), "Pipeline stopping, draining");
    }

    fn spawn(&mut self, task: Task) {
        let context = Arc::clone(&self.context);
        let workers = Arc::clone(&self.workers);
        let kind = task.kind();
        let frame_id = task.frame_id();

        self.pending.spawn(async move {
            let _permit = workers.acquire_owned().await.ok();
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || context.execute(task))
                .await
                .map_err(|e| PipelineError::aborted(kind, e.to_string()))
                .and_then(|r| r.map_err(PipelineError::from));
            TaskReport {
                kind,
                frame_id,
                elapsed: started.elapsed(),
                result,
            }
        });
    }

    fn on_complete(&mut self, joined: Result<TaskReport, JoinError>) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Pipeline task aborted");
                self.aggregator.record_task("aborted", false, 0.0);
                return;
            }
        };

        let elapsed_ms = report.elapsed.as_secs_f64() * 1000.0;
        let success = report.result.is_ok();
        observability::record_task_finished(report.kind, success, elapsed_ms);
        self.aggregator.record_task(report.kind, success, elapsed_ms);

        match report.result {
            Ok(output) => self.schedule_follow_on(output),
            Err(e) => error!(
                kind = report.kind,
                frame_id = report.frame_id,
                error = %e,
                "Task failed, no follow-on scheduled"
            ),
        }
    }

    fn schedule_follow_on(&mut self, output: TaskOutput) {
        match output {
            TaskOutput::Decoded { chunk, stored } => {
                if stored {
                    self.spawn(Task::Merge(MergeRequest::Immediate(chunk)));
                } else {
                    warn!(
                        vehicle_id = chunk.vehicle_id,
                        frame_id = chunk.frame_id,
                        chunk_id = chunk.chunk_id,
                        "Duplicate chunk ignored"
                    );
                }
            }
            TaskOutput::LocationUpdated {
                frame_id,
                primary: true,
                ..
            } => {
                self.spawn(Task::Merge(MergeRequest::Cleanup { frame_id }));
            }
            TaskOutput::LocationUpdated { .. } => {}
            TaskOutput::Merged(outcome) => {
                match outcome {
                    MergeOutcome::Deferred { .. } => self.aggregator.record_deferred(),
                    MergeOutcome::Duplicate {
                        vehicle_id,
                        frame_id,
                        chunk_id,
                    } => warn!(vehicle_id, frame_id, chunk_id, "Duplicate chunk ignored"),
                    MergeOutcome::Written { .. } | MergeOutcome::Idle { .. } => {}
                }
                self.poll_completion();
            }
            TaskOutput::Detected {
                frame_id,
                prediction,
            } => {
                info!(frame_id, %prediction, "Object detection finished");
            }
        }
    }

    /// Run the completion check off the loop. Merges that land while a check
    /// is in flight collapse into one re-check.
    fn poll_completion(&mut self) {
        if !self.completion.is_empty() {
            self.recheck = true;
            return;
        }
        let coordinator = Arc::clone(&self.context.coordinator);
        self.completion
            .spawn_blocking(move || coordinator.should_run_object_detection());
    }

    fn on_completion_checked(
        &mut self,
        joined: Result<coordinator::Result<Option<FrameId>>, JoinError>,
    ) {
        match joined {
            Ok(Ok(Some(frame_id))) => {
                self.aggregator.record_frame_completed(Instant::now());
                self.spawn(Task::ObjectDetection { frame_id });
                // the next frame may already be complete
                self.recheck = true;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(error = %e, "Completion check failed"),
            Err(e) => error!(error = %e, "Completion check aborted"),
        }
        if std::mem::take(&mut self.recheck) {
            self.poll_completion();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::tests::{context, context_with};
    use bytes::Bytes;
    use contracts::{DetectionError, ObjectDetector, SensorDataChunk, VehicleLocation};
    use tokio::time::timeout;

    struct PanickingDetector;

    impl ObjectDetector for PanickingDetector {
        fn detect(&self, _points: &[f32]) -> Result<String, DetectionError> {
            panic!("detector crashed");
        }
    }

    fn raw_chunk(vehicle_id: u32, frame_id: FrameId) -> Task {
        Task::Merge(MergeRequest::Immediate(SensorDataChunk::decoded(
            vehicle_id,
            frame_id,
            1,
            vec![1.0, 2.0, 3.0, 0.5],
        )))
    }

    #[tokio::test]
    async fn test_merge_chains_detection_before_stop_returns() {
        let ctx = context();
        let coordinator = Arc::clone(&ctx.coordinator);
        coordinator.register_vehicle(1);
        let (submitter, handle) = spawn_pipeline(ctx, 4);

        submitter.submit(raw_chunk(1, 0)).unwrap();
        let summary = timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.failed_tasks, 0);
        assert_eq!(summary.frames_completed, 1);
        assert_eq!(coordinator.current_frame(), 1);
        assert!(coordinator.object_prediction(1).is_some());
    }

    #[tokio::test]
    async fn test_back_to_back_frames_all_complete() {
        let ctx = context();
        let coordinator = Arc::clone(&ctx.coordinator);
        coordinator.register_vehicle(1);
        let (submitter, handle) = spawn_pipeline(ctx, 4);

        submitter.submit(raw_chunk(1, 0)).unwrap();
        submitter.submit(raw_chunk(1, 1)).unwrap();
        let summary = timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.frames_completed, 2);
        assert_eq!(summary.total_tasks, 4);
        assert_eq!(coordinator.current_frame(), 2);
    }

    #[tokio::test]
    async fn test_failed_task_schedules_nothing() {
        let (submitter, handle) = spawn_pipeline(context(), 2);
        let bad = SensorDataChunk::compressed(2, 0, 1, Bytes::from_static(&[1, 2, 3]));
        submitter.submit(Task::Decode(bad)).unwrap();

        let summary = timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_tasks, 1);
        assert_eq!(summary.failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_loop() {
        let ctx = context_with(Arc::new(PanickingDetector));
        let coordinator = Arc::clone(&ctx.coordinator);
        coordinator.register_vehicle(1);
        let (submitter, handle) = spawn_pipeline(ctx, 2);

        submitter.submit(raw_chunk(1, 0)).unwrap();
        let summary = timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.failed_tasks, 1);
        assert!(coordinator.object_prediction(1).is_none());
    }

    #[tokio::test]
    async fn test_submit_after_stop_rejected() {
        let (submitter, handle) = spawn_pipeline(context(), 2);
        handle.stop().await.unwrap();
        assert!(matches!(
            submitter.submit(raw_chunk(1, 0)),
            Err(ContractError::TaskRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_primary_pose_chains_backlog_cleanup() {
        let ctx = context();
        let coordinator = Arc::clone(&ctx.coordinator);
        coordinator.register_vehicle(1);
        coordinator.register_vehicle(2);
        coordinator.update_pose(2, 0, VehicleLocation::new(vec![0.0; 6]));
        let (submitter, handle) = spawn_pipeline(ctx, 4);

        submitter.submit(raw_chunk(2, 0)).unwrap();
        // let the deferred merge land before the primary pose
        timeout(Duration::from_secs(5), async {
            while coordinator.latest_chunk_id(2, 0) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        submitter
            .submit(Task::LocationUpdate {
                vehicle_id: 1,
                frame_id: 0,
                location: VehicleLocation::new(vec![0.0; 6]),
            })
            .unwrap();
        let summary = timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();

        assert!(coordinator.is_merged(2, 0));
        assert_eq!(summary.deferred_merges, 1);
    }
}
