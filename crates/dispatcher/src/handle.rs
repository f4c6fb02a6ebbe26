//! SinkHandle - one sink behind its own bounded queue and worker task

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{CompletedFrame, FrameSink};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<CompletedFrame>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker task for `sink`
    pub fn spawn<S: FrameSink + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Enqueue without waiting; a full queue drops the frame
    pub fn try_send(&self, frame: CompletedFrame) -> Result<(), DispatcherError> {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(f)) => {
                self.metrics.inc_dropped_count();
                observability::record_frame_dispatched(&self.name, false);
                warn!(sink = %self.name, frame_id = f.frame_id, "Queue full, frame dropped");
                Err(DispatcherError::QueueFull {
                    sink_name: self.name.clone(),
                    frame_id: f.frame_id,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Sink worker closed unexpectedly");
                Err(DispatcherError::WorkerClosed {
                    sink_name: self.name.clone(),
                })
            }
        }
    }

    /// Close the queue and wait for the worker to drain it
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "Worker task panicked");
        }
        debug!(sink = %self.name, "SinkHandle shutdown complete");
    }
}

#[instrument(name = "sink_worker_loop", skip(sink, rx, metrics), fields(sink = %name))]
async fn sink_worker<S: FrameSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<CompletedFrame>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!("Sink worker started");

    while let Some(frame) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        match sink.write(&frame).await {
            Ok(()) => {
                metrics.record_write(frame.frame_id, frame.point_count());
                observability::record_frame_dispatched(&name, true);
            }
            Err(e) => {
                metrics.inc_failure_count();
                observability::record_frame_dispatched(&name, false);
                error!(frame_id = frame.frame_id, error = %e, "Write failed");
            }
        }
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "Flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(error = %e, "Close failed on shutdown");
    }

    debug!("Sink worker stopped");
}
