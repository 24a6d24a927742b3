//! 控制协议定义
//!
//! 两条通道：
//! - 控制通道：TCP + JSONL（每条消息一行 JSON + '\n'），Agent 发起请求，Controller 逐条应答
//! - 广播通道：TCP，Controller 推送纯文本令牌（`START` / `STOP` / `SHUTDOWN` + '\n'）

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::CompressedBytes;
use crate::error::Error;

/// Agent 标识（由 Controller 分配，不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 请求类型（Agent → Controller）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// 注册，换取 Agent 标识与广播地址
    Register {},

    /// 审计状态上报
    AuditReport {
        id: AgentId,
        /// 当前是否正在审计
        auditing: bool,
        /// 压缩后的审计日志（None 表示没有日志）
        #[serde(default, skip_serializing_if = "Option::is_none")]
        log_payload: Option<CompressedBytes>,
    },
}

/// 响应类型（Controller → Agent）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// 注册成功
    Registered {
        id: AgentId,
        /// 广播通道地址（host:port）
        broadcast_endpoint: String,
    },

    /// 上报已确认
    Ack,

    /// 错误（无法解析的请求）
    Error { code: i32, message: String },
}

/// 广播令牌（Controller → 所有订阅者）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// 开始审计
    Start,
    /// 停止审计并上报日志
    Stop,
    /// 退出进程
    Shutdown,
}

impl Token {
    /// 线上格式
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Start => "START",
            Token::Stop => "STOP",
            Token::Shutdown => "SHUTDOWN",
        }
    }

    /// 带换行符的线上格式
    pub fn to_line(&self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "START" => Ok(Token::Start),
            "STOP" => Ok(Token::Stop),
            "SHUTDOWN" => Ok(Token::Shutdown),
            other => Err(Error::Protocol(format!("未知的广播令牌: {:?}", other))),
        }
    }
}

/// 无法解析请求时的错误码
pub const CODE_BAD_REQUEST: i32 = 400;
