//! Leader 模块 - Controller
//!
//! Controller 是注册表的唯一持有者，负责：
//! - 分配 Agent 标识
//! - 接收审计状态上报并保存日志
//! - 向所有订阅者广播控制令牌
//! - 操作台

mod broadcaster;
pub mod console;
mod handler;
mod log_store;
mod server;

pub use broadcaster::{Broadcaster, SubscriberId};
pub use handler::Handler;
pub use log_store::LogStore;
pub use server::Controller;
