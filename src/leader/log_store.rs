//! 审计日志存储
//!
//! 每个 Agent 一个文件，文件名由 AgentId 确定，每次上报覆盖旧内容。

use std::path::PathBuf;

use crate::error::Result;
use crate::protocol::AgentId;

/// 审计日志存储
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Agent 日志路径
    ///
    /// 标识中 `[A-Za-z0-9_-]` 以外的字符替换为 `_`，避免路径穿越。
    pub fn path_for(&self, id: &AgentId) -> PathBuf {
        let name: String = id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("audit-{}.log", name))
    }

    /// 写入（覆盖）日志
    pub async fn write(&self, id: &AgentId, text: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        tokio::fs::write(&path, text.as_bytes()).await?;
        Ok(path)
    }
}
