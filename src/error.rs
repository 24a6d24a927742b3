//! 错误类型定义

use thiserror::Error;

/// 库错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 日志压缩 / 解压错误
    #[error("日志编解码错误: {0}")]
    Codec(String),

    /// 协议错误（未知的消息类型或广播令牌）
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 连接错误
    #[error("连接错误: {0}")]
    Connection(String),

    /// 请求超时
    #[error("请求超时: {0}")]
    Timeout(String),

    /// Controller 拒绝了请求
    #[error("请求被拒绝: {message} (code={code})")]
    Rejected { code: i32, message: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
