//! Follower 模块 - Agent
//!
//! 每个被审计的主机运行一个 Agent：注册、订阅广播、启停审计、上报日志。

mod audit;
mod session;

pub use audit::{AuditSubsystem, CommandAudit};
pub use session::{resolve_broadcast_endpoint, AgentSession};
