//! EdgeConfig - 边缘协调器运行配置
//!
//! 由 config_loader 从 TOML/JSON 解析，CLI 参数可覆盖部分字段。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::VehicleId;

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct EdgeConfig {
    /// 网络服务配置
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// 任务流水线配置
    #[serde(default)]
    #[validate(nested)]
    pub pipeline: PipelineConfig,

    /// 数据协调器配置
    #[serde(default)]
    #[validate(nested)]
    pub coordinator: CoordinatorConfig,

    /// 带宽估计配置
    #[serde(default)]
    #[validate(nested)]
    pub bandwidth: BandwidthConfig,

    /// 合并帧输出
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

impl EdgeConfig {
    /// Merge buffer capacity per frame, in floats
    pub fn merge_buffer_capacity(&self) -> usize {
        self.coordinator.points_per_vehicle * self.server.expected_clients
    }
}

/// 网络服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口 (0 = 随机端口)
    #[serde(default = "default_port")]
    pub port: u16,

    /// 达到该车辆数后广播开始信号
    #[serde(default = "default_expected_clients")]
    #[validate(range(min = 1, max = 32))]
    pub expected_clients: usize,

    /// 最大并发连接数
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 32))]
    pub max_connections: usize,

    /// 单条消息最大字节数（含报文头）
    #[serde(default = "default_max_message_bytes")]
    #[validate(range(min = 64))]
    pub max_message_bytes: usize,

    /// 每次 socket 读取的缓冲区大小
    #[serde(default = "default_read_buffer_bytes")]
    #[validate(range(min = 512))]
    pub read_buffer_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            expected_clients: default_expected_clients(),
            max_connections: default_max_connections(),
            max_message_bytes: default_max_message_bytes(),
            read_buffer_bytes: default_read_buffer_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    31904
}

fn default_expected_clients() -> usize {
    1
}

fn default_max_connections() -> usize {
    32
}

fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_read_buffer_bytes() -> usize {
    64 * 1024
}

/// 任务流水线配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// 并行工作线程数
    #[serde(default = "default_worker_threads")]
    #[validate(range(min = 1, max = 1024))]
    pub worker_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    16
}

/// 数据协调器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoordinatorConfig {
    /// 参考车辆（其位姿定义合并坐标系）
    #[serde(default = "default_primary_vehicle_id")]
    pub primary_vehicle_id: VehicleId,

    /// 每辆车在合并缓冲区中的浮点数预算
    #[serde(default = "default_points_per_vehicle")]
    #[validate(range(min = 4))]
    pub points_per_vehicle: usize,

    /// 邻居对 chunk id 之和的完成阈值
    #[serde(default = "default_completion_quota")]
    #[validate(range(min = 1))]
    pub completion_quota: u32,

    /// 表示整帧上传的 chunk id
    #[serde(default = "default_full_frame_chunk_id")]
    pub full_frame_chunk_id: u16,

    /// 分区算法 (1/2 基础, 3 带宽加权, 4 自适应)
    #[serde(default = "default_partition_algorithm")]
    #[validate(range(min = 1, max = 4))]
    pub partition_algorithm: u8,

    /// 邻居判定半径（米）
    #[serde(default = "default_neighbor_radius")]
    #[validate(range(min = 0.0))]
    pub neighbor_radius_m: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            primary_vehicle_id: default_primary_vehicle_id(),
            points_per_vehicle: default_points_per_vehicle(),
            completion_quota: default_completion_quota(),
            full_frame_chunk_id: default_full_frame_chunk_id(),
            partition_algorithm: default_partition_algorithm(),
            neighbor_radius_m: default_neighbor_radius(),
        }
    }
}

fn default_primary_vehicle_id() -> VehicleId {
    1
}

fn default_points_per_vehicle() -> usize {
    533_248
}

fn default_completion_quota() -> u32 {
    4
}

fn default_full_frame_chunk_id() -> u16 {
    5
}

fn default_partition_algorithm() -> u8 {
    1
}

fn default_neighbor_radius() -> f64 {
    150.0
}

/// 带宽估计配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BandwidthConfig {
    /// EWMA 滑动窗口样本数
    #[serde(default = "default_window_len")]
    #[validate(range(min = 1))]
    pub window_len: usize,

    /// EWMA 时间衰减窗口（毫秒）
    #[serde(default = "default_max_window_ms")]
    #[validate(range(min = 1))]
    pub max_window_ms: u64,

    /// 无测量值时使用的带宽 (Mbps)
    #[serde(default = "default_fallback_mbps")]
    #[validate(range(min = 0.0))]
    pub fallback_mbps: f64,

    /// 分区决策使用的估计方式
    #[serde(default)]
    pub estimate: BandwidthEstimate,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            window_len: default_window_len(),
            max_window_ms: default_max_window_ms(),
            fallback_mbps: default_fallback_mbps(),
            estimate: BandwidthEstimate::default(),
        }
    }
}

fn default_window_len() -> usize {
    25
}

fn default_max_window_ms() -> u64 {
    30_000
}

fn default_fallback_mbps() -> f64 {
    10.0
}

/// 带宽估计方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandwidthEstimate {
    /// 最近一次原始测量
    #[default]
    Naive,
    /// 时间衰减 EWMA
    Ewma,
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink 名称
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    16
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出
    Log,
    /// 二进制点云文件输出
    File,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = EdgeConfig::default();
        assert_eq!(config.server.port, 31904);
        assert_eq!(config.pipeline.worker_threads, 16);
        assert_eq!(config.coordinator.primary_vehicle_id, 1);
        assert_eq!(config.coordinator.completion_quota, 4);
        assert_eq!(config.coordinator.full_frame_chunk_id, 5);
        assert_eq!(config.bandwidth.window_len, 25);
        assert_eq!(config.merge_buffer_capacity(), 533_248);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: EdgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.max_message_bytes, 4 * 1024 * 1024);
        assert_eq!(config.bandwidth.estimate, BandwidthEstimate::Naive);
        assert!(config.sinks.is_empty());
    }

    #[test]
    fn test_derived_rules_reject_bad_algorithm() {
        let mut config = EdgeConfig::default();
        assert!(config.validate().is_ok());
        config.coordinator.partition_algorithm = 9;
        assert!(config.validate().is_err());
    }
}
