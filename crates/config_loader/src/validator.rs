//! 配置校验模块
//!
//! 校验规则：
//! - 字段取值范围 (validator derive 规则)
//! - expected_clients <= max_connections
//! - read_buffer_bytes <= max_message_bytes
//! - sink 名称唯一，file sink 必须提供 path 参数

use std::collections::HashSet;

use contracts::{ContractError, EdgeConfig, SinkType};
use validator::Validate;

/// file sink 输出目录参数名
pub const FILE_SINK_PATH_PARAM: &str = "path";

/// 校验 EdgeConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &EdgeConfig) -> Result<(), ContractError> {
    validate_field_rules(config)?;
    validate_server(config)?;
    validate_sinks(config)?;
    Ok(())
}

/// 派生的字段规则
fn validate_field_rules(config: &EdgeConfig) -> Result<(), ContractError> {
    config
        .validate()
        .map_err(|e| ContractError::config_validation("config", e.to_string()))
}

/// 校验服务端跨字段约束
fn validate_server(config: &EdgeConfig) -> Result<(), ContractError> {
    let server = &config.server;

    if server.host.trim().is_empty() {
        return Err(ContractError::config_validation(
            "server.host",
            "host cannot be empty",
        ));
    }

    if server.expected_clients > server.max_connections {
        return Err(ContractError::config_validation(
            "server.expected_clients / server.max_connections",
            format!(
                "expected_clients ({}) must be <= max_connections ({})",
                server.expected_clients, server.max_connections
            ),
        ));
    }

    if server.read_buffer_bytes > server.max_message_bytes {
        return Err(ContractError::config_validation(
            "server.read_buffer_bytes",
            format!(
                "read_buffer_bytes ({}) must be <= max_message_bytes ({})",
                server.read_buffer_bytes, server.max_message_bytes
            ),
        ));
    }

    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(config: &EdgeConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in config.sinks.iter().enumerate() {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }

        if sink.sink_type == SinkType::File
            && sink
                .params
                .get(FILE_SINK_PATH_PARAM)
                .map_or(true, |p| p.trim().is_empty())
        {
            return Err(ContractError::config_validation(
                format!("sinks[{}].params.{}", idx, FILE_SINK_PATH_PARAM),
                "file sink requires a non-empty path",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SinkConfig;

    fn sink(name: &str, sink_type: SinkType) -> SinkConfig {
        SinkConfig {
            name: name.into(),
            sink_type,
            queue_capacity: 16,
            params: Default::default(),
        }
    }

    fn minimal_config() -> EdgeConfig {
        EdgeConfig {
            sinks: vec![sink("log", SinkType::Log)],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_range_rule_reported() {
        let mut config = minimal_config();
        config.pipeline.worker_threads = 0;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("worker_threads"), "got: {err}");
    }

    #[test]
    fn test_expected_clients_exceed_connections() {
        let mut config = minimal_config();
        config.server.expected_clients = 8;
        config.server.max_connections = 4;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("expected_clients (8)"), "got: {err}");
    }

    #[test]
    fn test_read_buffer_larger_than_message_limit() {
        let mut config = minimal_config();
        config.server.max_message_bytes = 1024;
        config.server.read_buffer_bytes = 4096;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("read_buffer_bytes"), "got: {err}");
    }

    #[test]
    fn test_duplicate_sink_name() {
        let mut config = minimal_config();
        config.sinks.push(sink("log", SinkType::Log));
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate sink name"), "got: {err}");
    }

    #[test]
    fn test_file_sink_requires_path() {
        let mut config = minimal_config();
        config.sinks.push(sink("frames", SinkType::File));
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("requires a non-empty path"), "got: {err}");

        config.sinks[1]
            .params
            .insert(FILE_SINK_PATH_PARAM.into(), "/tmp/frames".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_sink_name() {
        let mut config = minimal_config();
        config.sinks[0].name = String::new();
        assert!(validate(&config).is_err());
    }
}
