//! Edge runtime - wires coordinator, pipeline, dispatcher and server.
//!
//! Start order is dispatcher → coordinator → pipeline → server; shutdown
//! runs the other way so every stage drains into one that is still alive.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::{DownlinkSender, EdgeConfig, TaskSink};
use coordinator::algorithms::{
    partitioner_for, RawPointCodec, RigidTransformMerger, SummaryDetector,
};
use coordinator::{BandwidthEstimator, CoordinatorSettings, SensorDataCoordinator};
use dispatcher::{DispatchReport, DispatcherBuilder, DispatcherConfig};
use edge_server::{EdgeServer, ServerContext, ServerHandle, VehicleRegistry};
use pipeline::{spawn_pipeline, PipelineHandle, TaskContext};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::RunStats;

/// A running edge; dropped only through [`EdgeRuntime::shutdown`]
pub struct EdgeRuntime {
    started_at: Instant,
    coordinator: Arc<SensorDataCoordinator>,
    server: ServerHandle,
    pipeline: PipelineHandle,
    dispatcher: JoinHandle<DispatchReport>,
}

impl EdgeRuntime {
    #[instrument(name = "edge_runtime_start", skip(config))]
    pub async fn start(config: EdgeConfig) -> Result<Self> {
        let dispatcher_config = DispatcherConfig {
            sinks: config.sinks.clone(),
        };
        let (frame_tx, frame_rx) = mpsc::channel(dispatcher_config.input_capacity());
        let dispatcher = DispatcherBuilder::new(dispatcher_config, frame_rx)
            .build()
            .context("Failed to build sinks")?
            .spawn();

        let registry = Arc::new(VehicleRegistry::new(config.server.expected_clients));
        let partitioner =
            partitioner_for(&config.coordinator).context("Invalid partition algorithm")?;
        let coordinator = Arc::new(
            SensorDataCoordinator::new(
                CoordinatorSettings::from_config(&config),
                Arc::new(BandwidthEstimator::new(config.bandwidth.clone())),
                Arc::new(partitioner),
                Arc::clone(&registry) as Arc<dyn DownlinkSender>,
            )
            .with_frame_output(frame_tx),
        );

        let (submitter, pipeline) = spawn_pipeline(
            TaskContext {
                coordinator: Arc::clone(&coordinator),
                codec: Arc::new(RawPointCodec),
                merger: Arc::new(RigidTransformMerger),
                detector: Arc::new(SummaryDetector),
            },
            config.pipeline.worker_threads,
        );

        let server = EdgeServer::bind(ServerContext {
            config: config.server.clone(),
            coordinator: Arc::clone(&coordinator),
            registry,
            tasks: Arc::new(submitter) as Arc<dyn TaskSink>,
        })
        .await
        .context("Failed to start edge server")?
        .spawn()?;

        info!(
            addr = %server.local_addr(),
            expected_clients = config.server.expected_clients,
            workers = config.pipeline.worker_threads,
            sinks = config.sinks.len(),
            "Edge runtime started"
        );

        Ok(Self {
            started_at: Instant::now(),
            coordinator,
            server,
            pipeline,
            dispatcher,
        })
    }

    /// Stop in reverse order and collect the run statistics
    #[instrument(name = "edge_runtime_shutdown", skip(self))]
    pub async fn shutdown(self) -> Result<RunStats> {
        self.server
            .shutdown()
            .await
            .context("Edge server did not stop cleanly")?;

        let pipeline = self
            .pipeline
            .stop()
            .await
            .context("Task pipeline did not stop cleanly")?;

        let vehicles = self.coordinator.vehicle_ids().len();
        let last_frame = self.coordinator.current_frame();
        // 最后一个帧输出 sender 随协调器释放，dispatcher 随之退出
        drop(self.coordinator);
        let sinks = self.dispatcher.await.context("Dispatcher task failed")?;

        Ok(RunStats {
            duration: self.started_at.elapsed(),
            vehicles,
            last_frame,
            pipeline,
            sinks,
        })
    }
}
