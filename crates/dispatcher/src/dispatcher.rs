//! Dispatcher - fans completed frames out to the configured sinks

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{CompletedFrame, SinkConfig, SinkType};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Per-sink report returned when the dispatcher stops
pub type DispatchReport = Vec<(String, MetricsSnapshot)>;

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
}

impl DispatcherConfig {
    /// Capacity for the coordinator → dispatcher channel
    pub fn input_capacity(&self) -> usize {
        self.sinks
            .iter()
            .map(|s| s.queue_capacity)
            .max()
            .unwrap_or(16)
    }
}

pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: mpsc::Receiver<CompletedFrame>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: mpsc::Receiver<CompletedFrame>) -> Self {
        Self { config, input_rx }
    }

    /// Build all sinks; any failure aborts
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(sink_count = self.config.sinks.len()))]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let handles = self
            .config
            .sinks
            .iter()
            .map(create_sink_handle)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
        })
    }
}

#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => Ok(SinkHandle::spawn(
            LogSink::new(&config.name),
            config.queue_capacity,
        )),
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<CompletedFrame>,
}

impl Dispatcher {
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        input_rx: mpsc::Receiver<CompletedFrame>,
    ) -> Self {
        Self { handles, input_rx }
    }

    pub fn metrics(&self) -> DispatchReport {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run until the input channel closes, then drain every sink
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(mut self) -> DispatchReport {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut frame_count: u64 = 0;
        while let Some(frame) = self.input_rx.recv().await {
            frame_count += 1;
            self.dispatch_frame(frame);

            if frame_count.is_multiple_of(100) {
                debug!(frames = frame_count, "Dispatcher progress");
            }
        }

        info!(frames = frame_count, "Dispatcher input closed, shutting down");

        let metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), std::sync::Arc::clone(h.metrics())))
            .collect();
        for handle in self.handles {
            handle.shutdown().await;
        }

        info!("Dispatcher shutdown complete");
        metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect()
    }

    pub fn spawn(self) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.run())
    }

    fn dispatch_frame(&self, frame: CompletedFrame) {
        // points 为 Arc，clone 只复制引用
        for handle in &self.handles {
            if let Err(e) = handle.try_send(frame.clone()) {
                warn!(error = %e, "Frame not dispatched");
            }
        }
    }
}

/// Build a dispatcher straight from sink configs
pub fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: mpsc::Receiver<CompletedFrame>,
) -> Result<Dispatcher, DispatcherError> {
    DispatcherBuilder::new(DispatcherConfig { sinks: sink_configs }, input_rx).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::test_frame;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_dispatcher_fanout() {
        let (input_tx, input_rx) = mpsc::channel(10);
        let handles = vec![
            SinkHandle::spawn(LogSink::new("sink1"), 10),
            SinkHandle::spawn(LogSink::new("sink2"), 10),
        ];

        let handle = Dispatcher::with_handles(handles, input_rx).spawn();
        for i in 0..5 {
            input_tx.send(test_frame(i)).await.unwrap();
        }
        drop(input_tx);

        let report = handle.await.unwrap();
        assert_eq!(report.len(), 2);
        for (_, snapshot) in report {
            assert_eq!(snapshot.write_count, 5);
        }
    }

    #[tokio::test]
    async fn test_create_dispatcher_with_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let (input_tx, input_rx) = mpsc::channel(10);

        let configs = vec![
            SinkConfig {
                name: "log".to_string(),
                sink_type: SinkType::Log,
                queue_capacity: 4,
                params: HashMap::new(),
            },
            SinkConfig {
                name: "disk".to_string(),
                sink_type: SinkType::File,
                queue_capacity: 8,
                params: HashMap::from([(
                    "path".to_string(),
                    dir.path().to_string_lossy().into_owned(),
                )]),
            },
        ];
        let config = DispatcherConfig {
            sinks: configs.clone(),
        };
        assert_eq!(config.input_capacity(), 8);

        let handle = create_dispatcher(configs, input_rx).unwrap().spawn();
        input_tx.send(test_frame(12)).await.unwrap();
        drop(input_tx);
        handle.await.unwrap();

        assert!(dir.path().join("000012.bin").exists());
        assert!(dir.path().join("000012.json").exists());
    }

    #[test]
    fn test_file_sink_without_path_fails_build() {
        let (_tx, rx) = mpsc::channel(1);
        let configs = vec![SinkConfig {
            name: "disk".to_string(),
            sink_type: SinkType::File,
            queue_capacity: 1,
            params: HashMap::new(),
        }];
        assert!(matches!(
            create_dispatcher(configs, rx),
            Err(DispatcherError::SinkCreation { .. })
        ));
    }
}
