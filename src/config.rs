//! Controller / Agent 配置
//!
//! 默认值 → 环境变量 → 命令行参数，后者覆盖前者。

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// 控制通道默认端口
pub const DEFAULT_CONTROL_PORT: u16 = 5556;
/// 广播通道默认端口
pub const DEFAULT_BROADCAST_PORT: u16 = 5557;

/// 数据目录（默认 ~/.panama）
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".panama")
}

/// Controller 配置
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// 控制通道监听地址
    pub control_addr: String,
    /// 广播通道监听地址
    pub broadcast_addr: String,
    /// 告知 Agent 的广播地址（None 时使用实际绑定地址）
    pub advertise_broadcast: Option<String>,
    /// 审计日志保存目录
    pub log_dir: PathBuf,
    /// 退出时等待广播令牌发送完毕的时间
    pub shutdown_grace: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            control_addr: format!("0.0.0.0:{}", DEFAULT_CONTROL_PORT),
            broadcast_addr: format!("0.0.0.0:{}", DEFAULT_BROADCAST_PORT),
            advertise_broadcast: None,
            log_dir: default_data_dir().join("logs"),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

impl LeaderConfig {
    /// 从环境变量覆盖默认值
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("PANAMA_CONTROL_ADDR") {
            config.control_addr = addr;
        }
        if let Ok(addr) = std::env::var("PANAMA_BROADCAST_ADDR") {
            config.broadcast_addr = addr;
        }
        if let Ok(addr) = std::env::var("PANAMA_ADVERTISE_BROADCAST") {
            config.advertise_broadcast = Some(addr);
        }
        if let Ok(dir) = std::env::var("PANAMA_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        config
    }

    /// 仅绑定本机随机端口（测试用）
    pub fn ephemeral(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_addr: "127.0.0.1:0".to_string(),
            broadcast_addr: "127.0.0.1:0".to_string(),
            advertise_broadcast: None,
            log_dir: log_dir.into(),
            shutdown_grace: Duration::from_millis(500),
        }
    }
}

/// 外部审计子系统配置
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// 开启采集的命令（argv）
    pub enable_command: Vec<String>,
    /// 关闭采集的命令（argv）
    pub disable_command: Vec<String>,
    /// 审计日志位置
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enable_command: vec!["camflow".into(), "-e".into(), "true".into()],
            disable_command: vec!["camflow".into(), "-e".into(), "false".into()],
            log_path: PathBuf::from("/tmp/audit.log"),
        }
    }
}

/// Agent 配置
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// Controller 控制通道地址（host:port）
    pub controller_addr: String,
    /// 连接超时（None = 不限）
    pub connect_timeout: Option<Duration>,
    /// 每个控制请求的超时（None = 一直等待应答）
    pub request_timeout: Option<Duration>,
    /// 审计子系统
    pub audit: AuditConfig,
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            controller_addr: format!("localhost:{}", DEFAULT_CONTROL_PORT),
            connect_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
            audit: AuditConfig::default(),
        }
    }
}

impl FollowerConfig {
    /// 创建指向指定 Controller 的配置
    pub fn new(controller_addr: &str) -> Self {
        Self {
            controller_addr: controller_addr.to_string(),
            ..Default::default()
        }
    }

    /// 设置请求超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// 从环境变量覆盖默认值
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("PANAMA_CONTROLLER") {
            config.controller_addr = addr;
        }
        if let Ok(secs) = std::env::var("PANAMA_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Some(parse_timeout_secs(&secs)?);
        }
        if let Ok(path) = std::env::var("PANAMA_AUDIT_LOG") {
            config.audit.log_path = PathBuf::from(path);
        }
        Ok(config)
    }
}

/// 解析超时秒数，必须是正整数（0 与非数字都返回 `Error::Config`）
pub fn parse_timeout_secs(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("无效的超时秒数: {:?}", value)))?;
    if secs == 0 {
        return Err(Error::Config("超时秒数必须大于 0".to_string()));
    }
    Ok(Duration::from_secs(secs))
}
