//! Agent 会话
//!
//! 注册一次，然后在“等待广播令牌”和“控制通道一问一答”之间交替。
//! 两个阶段不会重叠：上报得到 Ack 之前不会处理下一个令牌。

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::audit::AuditSubsystem;
use crate::codec::{self, CompressedBytes};
use crate::config::FollowerConfig;
use crate::error::{Error, Result};
use crate::protocol::{AgentId, Request, Response, Token};

/// 控制通道连接
struct ControlChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    request_timeout: Option<Duration>,
}

impl ControlChannel {
    /// 发送请求并等待应答
    async fn request(&mut self, request: &Request) -> Result<Response> {
        let request_json = serde_json::to_string(request)?;
        let limit = self.request_timeout;

        with_timeout(limit, "控制请求", async {
            self.writer
                .write_all(format!("{}\n", request_json).as_bytes())
                .await?;

            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(Error::Connection("Controller 关闭了控制通道".to_string()));
            }

            match serde_json::from_str::<Response>(&line)? {
                Response::Error { code, message } => Err(Error::Rejected { code, message }),
                response => Ok(response),
            }
        })
        .await
    }
}

/// Agent 会话
pub struct AgentSession {
    id: AgentId,
    control: ControlChannel,
    broadcast: BufReader<TcpStream>,
    audit: Arc<dyn AuditSubsystem>,
    auditing: bool,
}

impl AgentSession {
    /// 向 Controller 注册并订阅广播通道
    ///
    /// 任何失败都直接返回，不重试。
    pub async fn register(config: FollowerConfig, audit: Arc<dyn AuditSubsystem>) -> Result<Self> {
        tracing::debug!("Connecting to controller {}...", config.controller_addr);
        let stream = connect(&config.controller_addr, config.connect_timeout).await?;
        let (reader, writer) = stream.into_split();
        let mut control = ControlChannel {
            reader: BufReader::new(reader),
            writer,
            request_timeout: config.request_timeout,
        };

        let (id, endpoint) = match control.request(&Request::Register {}).await? {
            Response::Registered {
                id,
                broadcast_endpoint,
            } => (id, broadcast_endpoint),
            other => {
                return Err(Error::Protocol(format!("注册响应异常: {:?}", other)));
            }
        };
        tracing::info!("🆔 Registered as {}", id);

        let endpoint = resolve_broadcast_endpoint(&config.controller_addr, &endpoint);
        let broadcast = connect(&endpoint, config.connect_timeout).await?;
        tracing::info!("📡 Subscribed to {}", endpoint);

        Ok(Self {
            id,
            control,
            broadcast: BufReader::new(broadcast),
            audit,
            auditing: false,
        })
    }

    /// Controller 分配的标识
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// 最近一次上报的审计状态
    pub fn is_auditing(&self) -> bool {
        self.auditing
    }

    /// 等待并处理广播令牌，收到 Shutdown 时返回
    pub async fn reaction_loop(&mut self) -> Result<()> {
        loop {
            let token = self.next_token().await?;
            tracing::debug!("📨 token: {}", token);

            match token {
                Token::Start => self.on_start().await?,
                Token::Stop => self.on_stop().await?,
                Token::Shutdown => {
                    tracing::info!("👋 Shutdown received, agent {} exiting", self.id);
                    return Ok(());
                }
            }
        }
    }

    /// 读取下一个合法令牌，未知令牌记录后跳过
    async fn next_token(&mut self) -> Result<Token> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.broadcast.read_line(&mut line).await? == 0 {
                return Err(Error::Connection("广播通道已关闭".to_string()));
            }
            match line.parse::<Token>() {
                Ok(token) => return Ok(token),
                Err(e) => tracing::warn!("Ignoring broadcast: {}", e),
            }
        }
    }

    async fn on_start(&mut self) -> Result<()> {
        if self.auditing {
            tracing::debug!("Start received while already auditing, enabling again");
        }

        if let Err(e) = self.call_audit(|audit| audit.enable()).await {
            tracing::warn!("Failed to enable audit capture: {}", e);
        }

        self.report(true, None).await
    }

    async fn on_stop(&mut self) -> Result<()> {
        if let Err(e) = self.call_audit(|audit| audit.disable()).await {
            tracing::warn!("Failed to disable audit capture: {}", e);
        }

        let payload = match self.call_audit(|audit| audit.fetch_log()).await {
            Ok(Some(text)) => match codec::encode(&text) {
                Ok(payload) => {
                    tracing::debug!("📦 Log {} bytes → {} bytes", text.len(), payload.len());
                    Some(payload)
                }
                Err(e) => {
                    tracing::warn!("Failed to compress audit log: {}", e);
                    None
                }
            },
            Ok(None) => {
                tracing::info!("No audit log found");
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read audit log: {}", e);
                None
            }
        };

        self.report(false, payload).await
    }

    /// 上报审计状态，等待 Ack
    async fn report(&mut self, auditing: bool, log_payload: Option<CompressedBytes>) -> Result<()> {
        let request = Request::AuditReport {
            id: self.id.clone(),
            auditing,
            log_payload,
        };

        match self.control.request(&request).await? {
            Response::Ack => {
                self.auditing = auditing;
                tracing::info!("📋 Reported auditing={}", auditing);
                Ok(())
            }
            other => Err(Error::Protocol(format!("上报响应异常: {:?}", other))),
        }
    }

    async fn call_audit<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn AuditSubsystem) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let audit = self.audit.clone();
        tokio::task::spawn_blocking(move || f(audit.as_ref()))
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("审计子系统调用失败: {}", e)))?
    }
}

async fn connect(addr: &str, limit: Option<Duration>) -> Result<TcpStream> {
    with_timeout(limit, "连接", async {
        TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("无法连接 {}: {}", addr, e)))
    })
    .await
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{}超过 {:?}", what, limit)))?,
        None => fut.await,
    }
}

/// 计算实际要连接的广播地址
///
/// Controller 绑定在 `0.0.0.0` / `::` 时返回的地址不可直接连接，换成 Controller 的主机名。
pub fn resolve_broadcast_endpoint(controller_addr: &str, endpoint: &str) -> String {
    match endpoint.parse::<SocketAddr>() {
        Ok(addr) if addr.ip().is_unspecified() => {
            format!("{}:{}", controller_host(controller_addr), addr.port())
        }
        _ => endpoint.to_string(),
    }
}

fn controller_host(addr: &str) -> String {
    let host = match addr.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && port.parse::<u16>().is_ok()
                && (!host.contains(':') || host.ends_with(']')) =>
        {
            host
        }
        _ => addr,
    };

    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}
