//! Edge 运行指标
//!
//! Prometheus 指标记录函数 + 进程内聚合器（用于退出时打印摘要）。

use std::collections::BTreeMap;
use std::time::Instant;

use contracts::{FrameId, VehicleId};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// 注册 `emp_edge_*` 指标描述，Prometheus 导出时作为 HELP 文本
pub fn describe_metrics() {
    describe_counter!(
        "emp_edge_messages_received_total",
        "Uplink messages decoded, by type"
    );
    describe_counter!(
        "emp_edge_protocol_errors_total",
        "Uplink messages skipped, by reason"
    );
    describe_gauge!(
        "emp_edge_bandwidth_kbps",
        "Latest uplink bandwidth estimate per vehicle"
    );
    describe_gauge!(
        "emp_edge_merge_buffer_used",
        Unit::Count,
        "Floats reserved in the newest merge buffer"
    );
    describe_gauge!(
        "emp_edge_merge_buffer_fill_ratio",
        "Reserved share of the newest merge buffer"
    );
    describe_counter!("emp_edge_frames_completed_total", "Frames that passed the completion check");
    describe_gauge!("emp_edge_last_frame_id", "Most recently completed frame");
    describe_gauge!("emp_edge_frame_vehicles", Unit::Count, "Vehicles in the last completed frame");
    describe_histogram!(
        "emp_edge_frame_latency_ms",
        Unit::Milliseconds,
        "First chunk arrival to frame completion"
    );
    describe_counter!("emp_edge_downlink_sent_total", "Downlink messages queued, by type and status");
    describe_counter!("emp_edge_tasks_total", "Pipeline tasks finished, by kind and status");
    describe_histogram!(
        "emp_edge_task_duration_ms",
        Unit::Milliseconds,
        "Pipeline task body duration, by kind"
    );
    describe_counter!(
        "emp_edge_frames_dispatched_total",
        "Completed frames handed to sinks, by sink and status"
    );
    describe_gauge!("emp_edge_connections_active", Unit::Count, "Vehicles currently bound");
}

/// 记录收到的上行消息
pub fn record_message_received(kind: &str) {
    counter!(
        "emp_edge_messages_received_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// 记录协议错误（未知消息类型、payload 解析失败等）
pub fn record_protocol_error(reason: &str) {
    counter!(
        "emp_edge_protocol_errors_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录车辆带宽估计 (kbps)
pub fn record_bandwidth(vehicle_id: VehicleId, kbps: f64) {
    gauge!(
        "emp_edge_bandwidth_kbps",
        "vehicle_id" => vehicle_id.to_string()
    )
    .set(kbps);
}

/// 记录合并缓冲区占用
pub fn record_merge_buffer_fill(used: usize, capacity: usize) {
    gauge!("emp_edge_merge_buffer_used").set(used as f64);
    if capacity > 0 {
        gauge!("emp_edge_merge_buffer_fill_ratio").set(used as f64 / capacity as f64);
    }
}

/// 记录帧完成
pub fn record_frame_completed(frame_id: FrameId, vehicles: usize, latency_ms: Option<f64>) {
    counter!("emp_edge_frames_completed_total").increment(1);
    gauge!("emp_edge_last_frame_id").set(f64::from(frame_id));
    gauge!("emp_edge_frame_vehicles").set(vehicles as f64);
    if let Some(latency) = latency_ms {
        histogram!("emp_edge_frame_latency_ms").record(latency);
    }
}

/// 记录下行消息入队
pub fn record_downlink_sent(kind: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "emp_edge_downlink_sent_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录任务执行结果与耗时
pub fn record_task_finished(kind: &str, success: bool, duration_ms: f64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "emp_edge_tasks_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "emp_edge_task_duration_ms",
        "kind" => kind.to_string()
    )
    .record(duration_ms);
}

/// 记录完成帧分发
pub fn record_frame_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "emp_edge_frames_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录在线连接数
pub fn record_connections(active: usize) {
    gauge!("emp_edge_connections_active").set(active as f64);
}

/// 流水线指标聚合器
///
/// 由调度循环独占持有，不需要加锁。
#[derive(Debug, Clone, Default)]
pub struct PipelineMetricsAggregator {
    /// 完成的任务数
    pub total_tasks: u64,

    /// 失败（含 panic）的任务数
    pub failed_tasks: u64,

    /// 因主车位姿未就绪而延后的合并
    pub deferred_merges: u64,

    /// 完成的帧数
    pub frames_completed: u64,

    /// 相邻两帧完成的间隔 (ms)
    pub frame_interval: RunningStats,

    last_completion: Option<Instant>,

    /// 各任务类型耗时统计 (ms)
    pub task_durations: BTreeMap<String, RunningStats>,
}

impl PipelineMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次任务执行
    pub fn record_task(&mut self, kind: &str, success: bool, duration_ms: f64) {
        self.total_tasks += 1;
        if !success {
            self.failed_tasks += 1;
        }
        self.task_durations
            .entry(kind.to_string())
            .or_default()
            .push(duration_ms);
    }

    pub fn record_deferred(&mut self) {
        self.deferred_merges += 1;
    }

    /// 记录一帧完成
    pub fn record_frame_completed(&mut self, at: Instant) {
        self.frames_completed += 1;
        if let Some(previous) = self.last_completion.replace(at) {
            let interval = at.saturating_duration_since(previous);
            self.frame_interval.push(interval.as_secs_f64() * 1000.0);
        }
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_tasks: self.total_tasks,
            failed_tasks: self.failed_tasks,
            failure_rate: if self.total_tasks > 0 {
                self.failed_tasks as f64 / self.total_tasks as f64 * 100.0
            } else {
                0.0
            },
            deferred_merges: self.deferred_merges,
            frames_completed: self.frames_completed,
            frame_interval_ms: StatsSummary::from(&self.frame_interval),
            task_duration_ms: self
                .task_durations
                .iter()
                .map(|(kind, stats)| (kind.clone(), StatsSummary::from(stats)))
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_tasks: u64,
    pub failed_tasks: u64,
    pub failure_rate: f64,
    pub deferred_merges: u64,
    pub frames_completed: u64,
    pub frame_interval_ms: StatsSummary,
    pub task_duration_ms: BTreeMap<String, StatsSummary>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Edge Pipeline Summary ===")?;
        writeln!(f, "Frames completed: {}", self.frames_completed)?;
        writeln!(f, "Frame interval (ms): {}", self.frame_interval_ms)?;
        writeln!(
            f,
            "Tasks: {} (failed {}, {:.2}%)",
            self.total_tasks, self.failed_tasks, self.failure_rate
        )?;
        writeln!(f, "Deferred merges: {}", self.deferred_merges)?;

        if !self.task_duration_ms.is_empty() {
            writeln!(f, "Task duration (ms):")?;
            for (kind, stats) in &self.task_duration_ms {
                writeln!(f, "  {}: {}", kind, stats)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
