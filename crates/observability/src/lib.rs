//! # Observability
//!
//! Edge 服务的日志与指标初始化。
//!
//! - 日志：`tracing-subscriber`，默认只放开本工作区各 crate 的级别，
//!   第三方依赖固定在 `warn`；`RUST_LOG` 优先
//! - 指标：Prometheus HTTP 导出，`emp_edge_*` 系列带描述，
//!   毫秒延迟直方图使用帧级分桶
//! - 进程内聚合：见 [`PipelineMetricsAggregator`]
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     edge_level: tracing::Level::DEBUG,
//!     ..Default::default()
//! })?;
//! observability::record_frame_completed(frame_id, vehicles, Some(latency_ms));
//! ```

pub mod metrics;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-exports
pub use crate::metrics::{
    record_bandwidth, record_connections, record_downlink_sent, record_frame_completed,
    record_frame_dispatched, record_merge_buffer_fill, record_message_received,
    record_protocol_error, record_task_finished, MetricsSummary, PipelineMetricsAggregator,
    RunningStats, StatsSummary,
};

/// Tracing targets that follow `edge_level`
pub const EDGE_TARGETS: &[&str] = &[
    "emp_edge",
    "edge_server",
    "framing",
    "coordinator",
    "pipeline",
    "dispatcher",
    "config_loader",
    "observability",
];

pub const DEFAULT_METRICS_PORT: u16 = 9100;

/// 帧延迟 / 任务耗时分桶 (ms)
const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0,
];

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 监听地址 (None = 禁用)
    pub metrics_addr: Option<SocketAddr>,
    /// 工作区 crate 的日志级别
    pub edge_level: Level,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_addr: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_METRICS_PORT))),
            edge_level: Level::INFO,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// Filter used when `RUST_LOG` is unset: dependencies at `warn`, every edge
/// crate at `level`
pub fn edge_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(EDGE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// 初始化 tracing，按需启动 Prometheus 导出
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(edge_directives(config.edge_level))
            .context("Invalid default log filter")?,
    };

    let json = (config.log_format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
    });
    let pretty = (config.log_format == LogFormat::Pretty).then(|| fmt::layer().pretty());
    let compact = (config.log_format == LogFormat::Compact).then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .with(compact)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(addr) = config.metrics_addr {
        install_prometheus(addr)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_addr = ?config.metrics_addr,
        edge_level = %config.edge_level,
        "Observability initialized"
    );
    Ok(())
}

fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Suffix("_ms".to_string()), LATENCY_BUCKETS_MS)
        .context("Invalid latency buckets")?
        .install()
        .context("Failed to install Prometheus recorder")?;
    crate::metrics::describe_metrics();

    tracing::info!(%addr, "Prometheus metrics endpoint initialized");
    Ok(())
}
