//! 外部审计子系统
//!
//! Agent 只需要三个同步操作：开启采集、关闭采集、读取最近一次的日志。

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::config::AuditConfig;
use crate::error::{Error, Result};

/// 审计子系统接口
///
/// 所有方法都是阻塞调用，Agent 通过 `spawn_blocking` 调用。
pub trait AuditSubsystem: Send + Sync {
    /// 开启主机审计采集
    fn enable(&self) -> Result<()>;

    /// 关闭主机审计采集
    fn disable(&self) -> Result<()>;

    /// 读取日志，`Ok(None)` 表示没有日志
    fn fetch_log(&self) -> Result<Option<String>>;
}

/// 通过外部命令控制的审计子系统（默认 camflow）
pub struct CommandAudit {
    enable_command: Vec<String>,
    disable_command: Vec<String>,
    log_path: PathBuf,
}

impl CommandAudit {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            enable_command: config.enable_command.clone(),
            disable_command: config.disable_command.clone(),
            log_path: config.log_path.clone(),
        }
    }

    fn run(argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("审计命令为空".to_string()))?;

        tracing::debug!("🔧 running {:?}", argv);
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()?;

        if !status.success() {
            return Err(Error::Other(anyhow::anyhow!(
                "{} exited with {}",
                program,
                status
            )));
        }
        Ok(())
    }
}

impl AuditSubsystem for CommandAudit {
    fn enable(&self) -> Result<()> {
        Self::run(&self.enable_command)
    }

    fn disable(&self) -> Result<()> {
        Self::run(&self.disable_command)
    }

    fn fetch_log(&self) -> Result<Option<String>> {
        match std::fs::read(&self.log_path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Ok(Some(text)),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ 审计日志不是有效的 UTF-8，非法字节已替换为 U+FFFD: path={}, {}",
                        self.log_path.display(),
                        e.utf8_error()
                    );
                    Ok(Some(String::from_utf8_lossy(e.as_bytes()).into_owned()))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
