//! 令牌广播器
//!
//! 维护广播通道的订阅者列表，将令牌推送给当前所有订阅者。
//! 之后才订阅的连接不会收到之前的令牌；`close_all` 之后不再接受订阅。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::protocol::Token;

/// 订阅者 ID
pub type SubscriberId = u64;

/// 令牌发送通道
pub type TokenSender = mpsc::Sender<Token>;

/// 每个订阅者的发送队列容量
pub const SUBSCRIBER_QUEUE: usize = 64;

/// 订阅者表
#[derive(Default)]
struct Subscribers {
    /// SubscriberId → 发送通道
    senders: HashMap<SubscriberId, TokenSender>,
    /// 已调用 `close_all`
    closed: bool,
}

/// 令牌广播器
pub struct Broadcaster {
    subscribers: RwLock<Subscribers>,
    /// 下一个订阅者 ID
    next_id: RwLock<SubscriberId>,
}

impl Broadcaster {
    /// 创建新的广播器
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 注册订阅者，返回订阅者 ID
    ///
    /// 广播器已关闭时返回 `None`，发送通道随之丢弃。
    pub fn subscribe(&self, sender: TokenSender) -> Option<SubscriberId> {
        let mut subscribers = self.subscribers.write();
        if subscribers.closed {
            tracing::debug!("📡 Broadcaster closed, subscription refused");
            return None;
        }

        let mut next_id = self.next_id.write();
        let id = *next_id;
        *next_id += 1;

        subscribers.senders.insert(id, sender);

        tracing::debug!("📡 Subscriber registered: id={}", id);
        Some(id)
    }

    /// 注销订阅者
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.write().senders.remove(&id).is_some() {
            tracing::debug!("📡 Subscriber unregistered: id={}", id);
        }
    }

    /// 广播令牌给所有订阅者（非阻塞，fire-and-forget）
    ///
    /// 返回成功入队的订阅者数量。
    pub fn broadcast(&self, token: Token) -> usize {
        let targets: Vec<(SubscriberId, TokenSender)> = {
            let subscribers = self.subscribers.read();
            subscribers.senders.iter().map(|(id, s)| (*id, s.clone())).collect()
        };

        if targets.is_empty() {
            tracing::debug!("📡 No subscribers: token={}", token);
            return 0;
        }

        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(token) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("📡 Queue full, dropping token: id={}, token={}", id, token);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("📡 Queue closed: id={}", id);
                }
            }
        }

        tracing::info!("📡 Broadcast {} → {} subscriber(s)", token, delivered);
        delivered
    }

    /// 丢弃所有发送通道并拒绝之后的订阅，订阅者在发送完剩余令牌后断开
    pub fn close_all(&self) {
        let closed = {
            let mut subscribers = self.subscribers.write();
            subscribers.closed = true;
            let count = subscribers.senders.len();
            subscribers.senders.clear();
            count
        };
        tracing::debug!("📡 Closed {} subscriber queue(s)", closed);
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().senders.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Subscribers::default()),
            next_id: RwLock::new(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_exactly_once() {
        let broadcaster = Broadcaster::new();

        let mut receivers: Vec<_> = (0..3)
            .map(|_| {
                let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
                broadcaster.subscribe(tx);
                rx
            })
            .collect();

        assert_eq!(broadcaster.broadcast(Token::Start), 3);

        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), Token::Start);
            // 不会收到第二次
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_tokens() {
        let broadcaster = Broadcaster::new();

        let (tx1, mut rx1) = mpsc::channel(SUBSCRIBER_QUEUE);
        broadcaster.subscribe(tx1);
        broadcaster.broadcast(Token::Start);

        let (tx2, mut rx2) = mpsc::channel(SUBSCRIBER_QUEUE);
        broadcaster.subscribe(tx2);
        broadcaster.broadcast(Token::Stop);

        assert_eq!(rx1.try_recv().unwrap(), Token::Start);
        assert_eq!(rx1.try_recv().unwrap(), Token::Stop);

        // 迟到的订阅者只能看到 Stop
        assert_eq!(rx2.try_recv().unwrap(), Token::Stop);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_no_subscribers() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.broadcast(Token::Shutdown), 0);
    }

    #[test]
    fn test_closed_and_full_queues_are_skipped() {
        let broadcaster = Broadcaster::new();

        let (tx_closed, rx_closed) = mpsc::channel(SUBSCRIBER_QUEUE);
        broadcaster.subscribe(tx_closed);
        drop(rx_closed);

        let (tx_full, mut rx_full) = mpsc::channel(1);
        broadcaster.subscribe(tx_full);

        assert_eq!(broadcaster.broadcast(Token::Start), 1);
        // 队列已满，第二个令牌被丢弃
        assert_eq!(broadcaster.broadcast(Token::Stop), 0);
        assert_eq!(rx_full.try_recv().unwrap(), Token::Start);
        assert!(rx_full.try_recv().is_err());
    }

    #[test]
    fn test_subscribe_unsubscribe_close() {
        let broadcaster = Broadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);

        let (tx1, _rx1) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id1 = broadcaster.subscribe(tx1).unwrap();
        let (tx2, mut rx2) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id2 = broadcaster.subscribe(tx2).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.unsubscribe(id1);
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.close_all();
        assert_eq!(broadcaster.subscriber_count(), 0);
        // 发送端全部释放后接收端看到关闭
        assert!(matches!(
            rx2.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_subscribe_after_close_is_refused() {
        let broadcaster = Broadcaster::new();
        let (tx1, _rx1) = mpsc::channel(SUBSCRIBER_QUEUE);
        assert!(broadcaster.subscribe(tx1).is_some());

        broadcaster.close_all();

        let (tx2, mut rx2) = mpsc::channel(SUBSCRIBER_QUEUE);
        assert_eq!(broadcaster.subscribe(tx2), None);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.broadcast(Token::Start), 0);
        // 被拒绝的发送端已丢弃，接收端立即看到关闭
        assert!(matches!(
            rx2.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
