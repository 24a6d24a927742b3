//! 测试辅助

#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use panama::{AuditSubsystem, Result};
use tokio::time::{sleep, Instant};

/// 记录调用的审计子系统
pub struct MockAudit {
    log: Option<String>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockAudit {
    pub fn with_log(text: &str) -> Self {
        Self {
            log: Some(text.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_log() -> Self {
        Self {
            log: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl AuditSubsystem for MockAudit {
    fn enable(&self) -> Result<()> {
        self.calls.lock().unwrap().push("enable");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.calls.lock().unwrap().push("disable");
        Ok(())
    }

    fn fetch_log(&self) -> Result<Option<String>> {
        self.calls.lock().unwrap().push("fetch_log");
        Ok(self.log.clone())
    }
}

/// 轮询等待条件成立（最多 5 秒）
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}
