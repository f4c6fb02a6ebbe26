//! Framing 错误类型

use contracts::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FramingError {
    /// 声明的消息长度超过上限，连接无法再同步
    #[error("message of {declared} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { declared: usize, limit: usize },

    /// 任务提交失败（流水线已停止）
    #[error("task submission rejected: {0}")]
    Submit(#[source] ContractError),
}

pub type Result<T> = std::result::Result<T, FramingError>;
