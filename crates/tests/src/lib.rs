//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 线协议快照测试
//! - 进程内 e2e：framer → pipeline → coordinator → dispatcher
//! - TCP e2e：模拟车辆连接真实 edge_server

#[cfg(test)]
mod contract_tests {
    use contracts::{DownlinkMessage, UplinkMessage};

    #[test]
    fn test_wire_header_snapshots() {
        assert_eq!(
            UplinkMessage::handshake(7).encode().as_ref(),
            &[0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 0, b'X']
        );
        assert_eq!(
            DownlinkMessage::finish(3).encode().as_ref(),
            &[0, 0, 0, 0, 0, 3, b'D']
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = contracts::EdgeConfig::default();
        assert!(config_loader::ConfigLoader::validate(&config).is_ok());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use contracts::{
        BandwidthConfig, DownlinkSender, EdgeConfig, FrameId, SinkConfig, SinkType,
        TaskSink, UplinkMessage, VehicleId, VehicleLocation,
    };
    use coordinator::algorithms::{
        GabrielPartitioner, PartitionStrategy, RawPointCodec, RigidTransformMerger,
        SummaryDetector,
    };
    use coordinator::{BandwidthEstimator, CoordinatorSettings, SensorDataCoordinator};
    use dispatcher::{create_dispatcher, FrameMetadata};
    use edge_server::{EdgeServer, ServerContext, VehicleRegistry};
    use framing::{DownlinkEvent, DownlinkSession, UplinkSession};
    use pipeline::{spawn_pipeline, TaskContext};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    const MAX_MESSAGE: usize = 64 * 1024;
    const WAIT: Duration = Duration::from_secs(10);

    fn edge_config() -> EdgeConfig {
        let mut config = EdgeConfig::default();
        config.server.expected_clients = 2;
        config.coordinator.points_per_vehicle = 64;
        config
    }

    fn pose(x: f32) -> VehicleLocation {
        VehicleLocation::new(vec![x, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    fn coordinator(
        config: &EdgeConfig,
        registry: &Arc<VehicleRegistry>,
        frame_tx: mpsc::Sender<contracts::CompletedFrame>,
    ) -> Arc<SensorDataCoordinator> {
        Arc::new(
            SensorDataCoordinator::new(
                CoordinatorSettings::from_config(config),
                Arc::new(BandwidthEstimator::new(BandwidthConfig::default())),
                Arc::new(GabrielPartitioner::new(PartitionStrategy::Basic, 100.0)),
                Arc::clone(registry) as Arc<dyn DownlinkSender>,
            )
            .with_frame_output(frame_tx),
        )
    }

    fn task_context(coordinator: &Arc<SensorDataCoordinator>) -> TaskContext {
        TaskContext {
            coordinator: Arc::clone(coordinator),
            codec: Arc::new(RawPointCodec),
            merger: Arc::new(RigidTransformMerger),
            detector: Arc::new(SummaryDetector),
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    /// Decode everything queued so far
    fn drain_downlink(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> (DownlinkSession, Vec<DownlinkEvent>) {
        let mut session = DownlinkSession::new(MAX_MESSAGE);
        let mut events = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            events.extend(session.on_bytes(&bytes).unwrap());
        }
        (session, events)
    }

    /// framer → pipeline → coordinator → dispatcher, no sockets
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_in_process_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = edge_config();

        let (frame_tx, frame_rx) = mpsc::channel(4);
        let sinks = vec![SinkConfig {
            name: "disk".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 4,
            params: HashMap::from([(
                "path".to_string(),
                dir.path().to_string_lossy().into_owned(),
            )]),
        }];
        let dispatcher = create_dispatcher(sinks, frame_rx).unwrap().spawn();

        let registry = Arc::new(VehicleRegistry::new(2));
        let coordinator = coordinator(&config, &registry, frame_tx);
        let (submitter, pipeline) = spawn_pipeline(task_context(&coordinator), 4);
        let tasks: Arc<dyn TaskSink> = Arc::new(submitter);

        let mut downlinks = HashMap::new();
        let mut sessions: HashMap<VehicleId, UplinkSession> = HashMap::new();
        for vehicle_id in [1, 2] {
            let (tx, rx) = mpsc::unbounded_channel();
            coordinator.register_vehicle(vehicle_id);
            registry.bind(vehicle_id, u64::from(vehicle_id), tx);
            downlinks.insert(vehicle_id, rx);
            sessions.insert(
                vehicle_id,
                UplinkSession::new(
                    Arc::clone(&tasks),
                    Arc::clone(coordinator.bandwidth()),
                    1,
                    MAX_MESSAGE,
                ),
            );
        }
        let mut feed = |vehicle_id: VehicleId, message: UplinkMessage| {
            let bytes = message.encode();
            let session = sessions.get_mut(&vehicle_id).unwrap();
            // 拆成两次读取
            let (a, b) = bytes.split_at(bytes.len() / 2);
            session.on_bytes(a).unwrap();
            session.on_bytes(b).unwrap();
        };

        feed(2, UplinkMessage::location(2, 0, &pose(10.0)));
        eventually(|| coordinator.vehicle_location(2, 0).is_ok()).await;

        // 主车位姿未到：延迟合并
        feed(2, UplinkMessage::raw_points(2, 0, 1, &[1.0, 2.0, 3.0, 0.5]));
        feed(1, UplinkMessage::location(1, 0, &pose(0.0)));
        feed(1, UplinkMessage::raw_points(1, 0, 1, &[4.0, 5.0, 6.0, 0.25]));

        eventually(|| coordinator.current_frame() == 1).await;
        assert!(coordinator.is_merged(1, 0));
        assert!(coordinator.is_merged(2, 0));

        let summary = timeout(WAIT, pipeline.stop()).await.unwrap().unwrap();
        assert_eq!(summary.frames_completed, 1);
        assert!(coordinator.object_prediction(1).is_some());

        drop(tasks);
        drop(sessions);
        drop(coordinator);
        let report = timeout(WAIT, dispatcher).await.unwrap().unwrap();
        assert_eq!(report[0].1.write_count, 1);

        let json = std::fs::read_to_string(dir.path().join("000000.json")).unwrap();
        let metadata: FrameMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata.vehicles, vec![1, 2]);
        assert_eq!(metadata.point_count, 2);

        let bin = std::fs::read(dir.path().join("000000.bin")).unwrap();
        let xs: Vec<f32> = bin
            .chunks_exact(16)
            .map(|p| f32::from_le_bytes([p[0], p[1], p[2], p[3]]))
            .collect();
        assert!(xs.contains(&4.0));
        assert!(xs.contains(&11.0));

        for vehicle_id in [1, 2] {
            let (session, events) = drain_downlink(downlinks.get_mut(&vehicle_id).unwrap());
            assert!(session.is_started());
            assert!(events.contains(&DownlinkEvent::FrameFinished(0)));
            assert!(events
                .iter()
                .any(|e| matches!(e, DownlinkEvent::Decision { frame_id: Some(0), .. })));
            assert_eq!(session.next_frame(), 1);
            assert_eq!(session.boundaries().len(), 1);
        }
    }

    struct SimulatedVehicle {
        id: VehicleId,
        stream: TcpStream,
        downlink: DownlinkSession,
    }

    impl SimulatedVehicle {
        async fn connect(addr: std::net::SocketAddr, id: VehicleId) -> Self {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(&UplinkMessage::handshake(id).encode())
                .await
                .unwrap();
            Self {
                id,
                stream,
                downlink: DownlinkSession::new(MAX_MESSAGE),
            }
        }

        async fn send(&mut self, message: UplinkMessage) {
            self.stream.write_all(&message.encode()).await.unwrap();
        }

        /// Read until `done` holds for an event
        async fn wait_for(&mut self, done: impl Fn(&DownlinkEvent) -> bool) {
            let mut buf = [0u8; 1024];
            timeout(WAIT, async {
                loop {
                    let n = self.stream.read(&mut buf).await.unwrap();
                    assert!(n > 0, "vehicle {} disconnected", self.id);
                    let events = self.downlink.on_bytes(&buf[..n]).unwrap();
                    if events.iter().any(&done) {
                        return;
                    }
                }
            })
            .await
            .expect("downlink event not received");
        }

        async fn send_pose(&mut self, frame_id: FrameId, x: f32) {
            self.send(UplinkMessage::location(self.id, frame_id, &pose(x)))
                .await;
        }
    }

    /// Two vehicles over TCP against a real edge server on an ephemeral port
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_tcp_fleet() {
        let mut config = edge_config();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;

        let (frame_tx, mut frame_rx) = mpsc::channel(4);
        let registry = Arc::new(VehicleRegistry::new(config.server.expected_clients));
        let coordinator = coordinator(&config, &registry, frame_tx);
        let (submitter, pipeline) = spawn_pipeline(task_context(&coordinator), 4);
        let server = EdgeServer::bind(ServerContext {
            config: config.server.clone(),
            coordinator: Arc::clone(&coordinator),
            registry,
            tasks: Arc::new(submitter),
        })
        .await
        .unwrap()
        .spawn()
        .unwrap();

        let mut primary = SimulatedVehicle::connect(server.local_addr(), 1).await;
        let mut other = SimulatedVehicle::connect(server.local_addr(), 2).await;
        primary.wait_for(|e| *e == DownlinkEvent::Started).await;
        other.wait_for(|e| *e == DownlinkEvent::Started).await;

        other.send_pose(0, 10.0).await;
        eventually(|| coordinator.vehicle_location(2, 0).is_ok()).await;
        other
            .send(UplinkMessage::raw_points(2, 0, 1, &[1.0, 0.0, 0.0, 1.0]))
            .await;
        primary.send_pose(0, 0.0).await;
        primary
            .send(UplinkMessage::raw_points(1, 0, 1, &[2.0, 0.0, 0.0, 1.0]))
            .await;

        primary
            .wait_for(|e| *e == DownlinkEvent::FrameFinished(0))
            .await;
        other.wait_for(|e| *e == DownlinkEvent::FrameFinished(0)).await;
        assert_eq!(primary.downlink.next_frame(), 1);

        let frame = timeout(WAIT, frame_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.vehicles, vec![1, 2]);
        assert_eq!(frame.point_count(), 2);

        drop(primary);
        drop(other);
        timeout(WAIT, server.shutdown()).await.unwrap().unwrap();
        let summary = timeout(WAIT, pipeline.stop()).await.unwrap().unwrap();
        assert_eq!(summary.frames_completed, 1);
        assert_eq!(summary.failed_tasks, 0);
        assert!(!coordinator.is_online(1));
    }
}
