//! 控制请求处理器
//!
//! 处理 Agent 的注册与审计状态上报

use std::sync::Arc;

use super::log_store::LogStore;
use crate::codec::{self, CompressedBytes};
use crate::protocol::{AgentId, Request, Response};
use crate::registry::Registry;

/// 控制请求处理器
pub struct Handler {
    /// 注册表
    registry: Arc<Registry>,
    /// 日志存储
    log_store: LogStore,
    /// 告知 Agent 的广播地址
    broadcast_endpoint: String,
}

impl Handler {
    /// 创建处理器
    pub fn new(registry: Arc<Registry>, log_store: LogStore, broadcast_endpoint: String) -> Self {
        Self {
            registry,
            log_store,
            broadcast_endpoint,
        }
    }

    /// 处理请求
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Register {} => self.handle_register(),

            Request::AuditReport {
                id,
                auditing,
                log_payload,
            } => self.handle_audit_report(id, auditing, log_payload).await,
        }
    }

    /// 分配标识并登记
    fn handle_register(&self) -> Response {
        let id = self.registry.register();
        tracing::info!("🤝 Agent registered: id={}", id);

        Response::Registered {
            id,
            broadcast_endpoint: self.broadcast_endpoint.clone(),
        }
    }

    /// 保存日志并更新审计状态
    ///
    /// 日志先于状态落盘，状态变化时日志已可读。
    /// 日志解压或写入失败只记录，不影响应答。
    async fn handle_audit_report(
        &self,
        id: AgentId,
        auditing: bool,
        log_payload: Option<CompressedBytes>,
    ) -> Response {
        if let Some(payload) = log_payload {
            tracing::debug!("📥 Log payload from {}: {} bytes compressed", id, payload.len());

            match codec::decode(&payload) {
                Ok(text) => match self.log_store.write(&id, &text).await {
                    Ok(path) => {
                        tracing::info!("💾 Saved audit log for {}: {}", id, path.display());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to save audit log for {}: {}", id, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to decode audit log from {}: {}", id, e);
                }
            }
        }

        if self.registry.set_auditing(&id, auditing).is_none() {
            tracing::warn!("Audit report from unregistered agent accepted: id={}", id);
        }
        tracing::info!("📋 Agent {} auditing={}", id, auditing);

        Response::Ack
    }
}
