//! 推送通道抽象
//!
//! 调度器只关心两件事：往连接推一条文本、关闭连接。连接身份用 Arc 的分配地址判断，
//! 这样重连后注册表里的新连接不会被旧连接的清理误删。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 推送 / 关闭失败
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("serialize failed: {0}")]
    Serialize(String),
}

/// 一条活跃连接
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, text: String) -> Result<(), TransportError>;

    /// 尽力关闭；错误只用于日志
    fn close(&self) -> Result<(), TransportError>;
}

/// 注册表与队列之间传递的连接句柄
pub type ConnectionHandle = Arc<dyn Transport>;

/// 两个句柄是否指向同一条连接（比较数据指针，忽略 vtable）
pub fn same_connection(a: &ConnectionHandle, b: &ConnectionHandle) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// 发往连接写任务的帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// 基于 mpsc 的连接句柄：真正的写操作由持有 Receiver 的写任务完成（WebSocket 写半边、测试观察者等）
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: CancellationToken,
    close_calls: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            closed: CancellationToken::new(),
            close_calls: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// 连接关闭时触发（读循环据此退出）
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 写任务发现底层连接已断时调用，不计入 close 次数
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// close() 被调用的次数
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn push(&self, text: String) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.closed.cancel();
        self.tx
            .send(Outbound::Close)
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}
