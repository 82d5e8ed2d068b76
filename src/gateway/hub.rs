//! WebSocket 推送网关
//!
//! 每条连接：握手 → 注册连接并加入轮转队列 → 读循环（ping/stop/input、读超时）→ 清理。
//! 写操作全部交给独立的写任务，调度循环只通过 ChannelTransport 推送。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::message::{ClientFrame, Handshake, HandshakeError};
use crate::config::GatewaySection;
use crate::core::{ChannelTransport, ConnectionHandle, ConnectionRegistry, Outbound, Transport, TurnQueue, TurnTicket};

/// 网关超时设置
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimeouts {
    pub handshake: Duration,
    pub read: Duration,
}

impl From<&GatewaySection> for GatewayTimeouts {
    fn from(cfg: &GatewaySection) -> Self {
        Self {
            handshake: cfg.handshake_timeout(),
            read: cfg.read_timeout(),
        }
    }
}

/// 推送网关：只接触 TurnQueue 与 ConnectionRegistry
pub struct Gateway {
    queue: Arc<TurnQueue<TurnTicket>>,
    registry: Arc<ConnectionRegistry>,
    timeouts: GatewayTimeouts,
}

impl Gateway {
    pub fn new(
        queue: Arc<TurnQueue<TurnTicket>>,
        registry: Arc<ConnectionRegistry>,
        timeouts: GatewayTimeouts,
    ) -> Self {
        Self {
            queue,
            registry,
            timeouts,
        }
    }

    /// 绑定地址并服务，直到 stop 被取消
    pub async fn run(self: Arc<Self>, bind_addr: &str, stop: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        tracing::info!("Gateway listening on ws://{}", listener.local_addr()?);
        self.serve(listener, stop).await;
        Ok(())
    }

    /// 在已绑定的 listener 上接受连接
    pub async fn serve(self: Arc<Self>, listener: TcpListener, stop: CancellationToken) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        let gateway = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = gateway.handle_connection(stream, addr).await {
                                tracing::warn!("Connection from {} rejected: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }
        tracing::info!("Gateway stopped accepting connections");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), HandshakeError> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| HandshakeError::Transport(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let hello = match tokio::time::timeout(self.timeouts.handshake, read_handshake(&mut ws_rx)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout),
        };
        let hello = match hello {
            Ok(hello) => hello,
            Err(e) => {
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                return Err(e);
            }
        };

        let (conn, mut outbound) = ChannelTransport::new();
        let closed = conn.closed_token();
        let writer_conn = Arc::clone(&conn);
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            writer_conn.mark_closed();
        });

        let user_id = hello.user_id;
        let handle: ConnectionHandle = conn.clone();
        let version = self.registry.upsert(&user_id, Arc::clone(&handle));
        self.queue.add(user_id.clone(), TurnTicket::new(hello.session_id));
        tracing::info!(user_id = %user_id, version, %addr, "Connection registered");

        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => break,
                next = tokio::time::timeout(self.timeouts.read, ws_rx.next()) => next,
            };
            let msg = match next {
                Err(_) => {
                    tracing::info!(user_id = %user_id, "Read timeout, closing connection");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::warn!(user_id = %user_id, "WebSocket receive error: {}", e);
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                WsMessage::Text(text) => match ClientFrame::parse(&text) {
                    Ok(ClientFrame::Ping) => {
                        if conn.push(ClientFrame::pong_json()).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientFrame::Stop) => {
                        tracing::info!(user_id = %user_id, "Client requested stop");
                        break;
                    }
                    Ok(ClientFrame::Input { .. }) | Ok(ClientFrame::Pong) => {}
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, "Ignoring malformed frame: {}", e);
                    }
                },
                WsMessage::Close(_) => break,
                // 协议层 ping 由 tungstenite 自动应答
                _ => {}
            }
        }

        // 只有自己仍是当前连接时才退出轮转，重连后的新连接保留队列条目
        if self.registry.remove_if(&user_id, &handle) {
            self.queue.remove(&user_id);
        }
        if !conn.is_closed() {
            let _ = conn.close();
        }
        let _ = writer.await;

        tracing::info!(user_id = %user_id, %addr, "Connection closed");
        Ok(())
    }
}

async fn read_handshake(ws_rx: &mut SplitStream<WebSocketStream<TcpStream>>) -> Result<Handshake, HandshakeError> {
    while let Some(msg) = ws_rx.next().await {
        match msg.map_err(|e| HandshakeError::Transport(e.to_string()))? {
            WsMessage::Text(text) => return Handshake::parse(&text),
            WsMessage::Close(_) => return Err(HandshakeError::Closed),
            _ => continue,
        }
    }
    Err(HandshakeError::Closed)
}
