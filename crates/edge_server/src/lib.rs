//! # Edge Server
//!
//! 车辆连接层：TCP 监听、每连接读写任务、下行队列与开始信号。
//!
//! - 连接上第一个报文头确定车辆 id：注册到协调器并绑定下行队列
//! - 在线车辆数达到 `expected_clients` 后广播一次 `S`
//! - 断开时标记离线并解绑队列
//! - 超长报文等不可恢复的协议错误直接关闭连接

mod connection;
mod error;
mod registry;
mod server;

pub use error::{Result, ServerError};
pub use registry::{ConnectionId, DownlinkQueue, VehicleRegistry};
pub use server::{EdgeServer, ServerContext, ServerHandle};
