//! panama - 审计集群控制面
//!
//! 一个 Controller 协调多台主机上的 Agent，统一启停主机审计采集，
//! 并在采集结束后集中回收各 Agent 的审计日志。
//!
//! # 通道
//!
//! - **控制通道**：Agent → Controller，一问一答（注册、审计状态上报）
//! - **广播通道**：Controller → 所有 Agent，只推送 `START` / `STOP` / `SHUTDOWN`
//!
//! # Feature Flags
//!
//! - `leader`: Controller（注册表、广播、日志保存、操作台）
//! - `follower`: Agent（注册、响应广播、调用审计子系统）

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;

#[cfg(feature = "leader")]
pub mod leader;

#[cfg(feature = "follower")]
pub mod follower;

// Re-exports
pub use codec::CompressedBytes;
pub use config::{AuditConfig, FollowerConfig, LeaderConfig};
pub use error::{Error, Result};
pub use protocol::{AgentId, Request, Response, Token};
pub use registry::{Registry, RegistryEntry};

#[cfg(feature = "leader")]
pub use leader::Controller;

#[cfg(feature = "follower")]
pub use follower::{AgentSession, AuditSubsystem, CommandAudit};
