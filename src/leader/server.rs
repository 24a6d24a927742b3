//! Controller 服务
//!
//! 两个 TCP 监听器：
//! - 控制通道：每个连接一个任务，逐条读取请求并应答
//! - 广播通道：每个订阅者一个任务，把广播器推来的令牌写到连接上

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use super::broadcaster::{Broadcaster, SubscriberId, SUBSCRIBER_QUEUE};
use super::handler::Handler;
use super::log_store::LogStore;
use crate::config::LeaderConfig;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response, Token, CODE_BAD_REQUEST};
use crate::registry::Registry;

/// Controller 服务
pub struct Controller {
    config: LeaderConfig,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    handler: Arc<Handler>,
    control_addr: SocketAddr,
    broadcast_addr: SocketAddr,
    /// bind 后、run 前持有监听器
    listeners: Mutex<Option<(TcpListener, TcpListener)>>,
    /// 订阅者连接任务（退出时等待令牌写完）
    subscriber_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Controller {
    /// 绑定控制通道与广播通道
    pub async fn bind(config: LeaderConfig) -> Result<Arc<Self>> {
        let control = TcpListener::bind(&config.control_addr).await.map_err(|e| {
            Error::Connection(format!("绑定控制通道 {} 失败: {}", config.control_addr, e))
        })?;
        let broadcast = TcpListener::bind(&config.broadcast_addr).await.map_err(|e| {
            Error::Connection(format!("绑定广播通道 {} 失败: {}", config.broadcast_addr, e))
        })?;

        let control_addr = control.local_addr()?;
        let broadcast_addr = broadcast.local_addr()?;
        let broadcast_endpoint = config
            .advertise_broadcast
            .clone()
            .unwrap_or_else(|| broadcast_addr.to_string());

        let registry = Arc::new(Registry::new());
        let handler = Arc::new(Handler::new(
            registry.clone(),
            LogStore::new(&config.log_dir),
            broadcast_endpoint,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            registry,
            broadcaster: Broadcaster::new(),
            handler,
            control_addr,
            broadcast_addr,
            listeners: Mutex::new(Some((control, broadcast))),
            subscriber_tasks: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            shutdown_tx,
        }))
    }

    /// 控制通道实际监听地址
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// 广播通道实际监听地址
    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// 广播令牌，返回入队的订阅者数量
    pub fn broadcast(&self, token: Token) -> usize {
        self.broadcaster.broadcast(token)
    }

    /// 运行 Controller，直到 `shutdown()` 或收到中断信号
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (control, broadcast) = self
            .listeners
            .lock()
            .take()
            .ok_or_else(|| Error::Config("Controller 已经在运行".to_string()))?;

        tracing::info!(
            "🚀 Controller 启动: control={}, broadcast={}, logs={}",
            self.control_addr,
            self.broadcast_addr,
            self.config.log_dir.display()
        );

        let subscriber_loop = {
            let controller = self.clone();
            tokio::spawn(async move {
                controller.accept_subscribers(broadcast).await;
            })
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = control.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let controller = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = controller.handle_control(stream, peer).await {
                                    tracing::error!("处理控制连接失败: peer={}, {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("接受控制连接失败: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("收到中断信号，准备退出...");
                    self.shutdown().await;
                }
            }
        }

        subscriber_loop.abort();
        tracing::info!("👋 Controller 已停止");
        Ok(())
    }

    /// 通知所有 Agent 退出并停止服务
    ///
    /// 广播 Shutdown 后关闭所有订阅队列，在 `shutdown_grace` 内等待令牌写出。
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        self.broadcaster.broadcast(Token::Shutdown);
        self.broadcaster.close_all();

        let tasks = std::mem::take(&mut *self.subscriber_tasks.lock());
        let deadline = Instant::now() + self.config.shutdown_grace;
        for task in tasks {
            if timeout_at(deadline, task).await.is_err() {
                tracing::warn!("等待订阅者断开超时，放弃剩余连接");
                break;
            }
        }

        self.shutdown_tx.send_replace(true);
    }

    /// 处理单个控制连接：一问一答
    async fn handle_control(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        tracing::debug!("📥 控制连接: peer={}", peer);
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<Request>(&line) {
                        Ok(request) => self.handler.handle(request).await,
                        Err(e) => {
                            tracing::warn!("解析请求失败: peer={}, {}", peer, e);
                            Response::Error {
                                code: CODE_BAD_REQUEST,
                                message: format!("Invalid request: {}", e),
                            }
                        }
                    };

                    let resp_json = serde_json::to_string(&response)?;
                    writer.write_all(format!("{}\n", resp_json).as_bytes()).await?;
                }
                Err(e) => {
                    tracing::error!("读取失败: peer={}, {}", peer, e);
                    break;
                }
            }
        }

        tracing::debug!("📤 控制连接关闭: peer={}", peer);
        Ok(())
    }

    /// 接受广播订阅
    async fn accept_subscribers(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
                    // 关闭检查与登记在广播器的同一把锁内完成
                    let Some(id) = self.broadcaster.subscribe(tx) else {
                        tracing::debug!("📡 正在退出，拒绝订阅: peer={}", peer);
                        continue;
                    };
                    tracing::debug!("📡 订阅连接: peer={}, id={}", peer, id);

                    let broadcaster = self.broadcaster.clone();
                    let task = tokio::spawn(serve_subscriber(stream, rx, broadcaster, id));

                    let mut tasks = self.subscriber_tasks.lock();
                    tasks.retain(|t| !t.is_finished());
                    tasks.push(task);
                }
                Err(e) => {
                    tracing::error!("接受订阅连接失败: {}", e);
                }
            }
        }
    }
}

/// 把令牌写到订阅连接，直到队列关闭或对端断开
async fn serve_subscriber(
    stream: TcpStream,
    mut rx: mpsc::Receiver<Token>,
    broadcaster: Arc<Broadcaster>,
    id: SubscriberId,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = [0u8; 64];

    loop {
        tokio::select! {
            token = rx.recv() => {
                match token {
                    Some(token) => {
                        if let Err(e) = writer.write_all(token.to_line().as_bytes()).await {
                            tracing::debug!("📡 写入订阅者失败: id={}, {}", id, e);
                            break;
                        }
                    }
                    None => break,
                }
            }
            // 订阅者不发送数据，读到 EOF 说明对端已断开
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    broadcaster.unsubscribe(id);
}
