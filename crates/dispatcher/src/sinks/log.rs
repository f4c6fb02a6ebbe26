//! LogSink - logs merged frame summary via tracing

use contracts::{CompletedFrame, ContractError, FrameSink};
use tracing::{info, instrument};

/// Sink that logs frame summaries for debugging
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_frame_summary(&self, frame: &CompletedFrame) {
        info!(
            sink = %self.name,
            frame_id = frame.frame_id,
            vehicles = ?frame.vehicles,
            points = frame.point_count(),
            latency_ms = frame.latency_ms,
            "Merged frame completed"
        );
    }
}

impl FrameSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, frame),
        fields(sink = %self.name, frame_id = frame.frame_id)
    )]
    async fn write(&mut self, frame: &CompletedFrame) -> Result<(), ContractError> {
        self.log_frame_summary(frame);
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        // Nothing to flush for log sink
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}
