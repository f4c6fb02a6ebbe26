//! # Dispatcher
//!
//! 合并帧分发模块。
//!
//! 负责：
//! - 消费协调器产出的 `CompletedFrame`
//! - Fan-out 到多个 sinks（日志 / 文件）
//! - 每个 sink 独立队列，慢 sink 只丢自己的帧

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{CompletedFrame, FrameSink};
pub use dispatcher::{
    DispatchReport, Dispatcher, DispatcherBuilder, DispatcherConfig, create_dispatcher,
};
pub use error::DispatcherError;
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use sinks::{FileSink, FileSinkConfig, FrameMetadata, LogSink};
