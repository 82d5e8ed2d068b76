//! 调度循环：全进程唯一的消费者
//!
//! 每轮从 TurnQueue 取一个会话 → 查连接 → 跑一轮对话 → 推送。
//! 任何失败都把会话移出队列，不重试；只有等待队列时会响应停止信号，进行中的一轮不会被打断。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::registry::ConnectionRegistry;
use super::transport::TransportError;
use super::turn_queue::TurnQueue;
use crate::config::SchedulerSection;
use crate::dialogue::DialogueController;

/// 队列条目携带的数据：握手时客户端指定的会话
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnTicket {
    pub session_id: Option<String>,
}

impl TurnTicket {
    pub fn new(session_id: Option<String>) -> Self {
        Self { session_id }
    }
}

/// 一次调度的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 等待超时，队列为空
    Idle,
    ConnectionMissing(String),
    TurnFailed(String),
    PushFailed(String),
    Delivered(String),
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// 队列为空时单次等待时长
    pub idle_timeout: Duration,
    /// 每成功推送一轮后的停顿
    pub turn_interval: Duration,
    /// 闲置上下文的清扫周期
    pub sweep_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(1000),
            turn_interval: Duration::ZERO,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&SchedulerSection> for DispatchSettings {
    fn from(cfg: &SchedulerSection) -> Self {
        Self {
            idle_timeout: cfg.idle_timeout(),
            turn_interval: cfg.turn_interval(),
            sweep_interval: cfg.context_sweep(),
        }
    }
}

pub struct Dispatcher {
    queue: Arc<TurnQueue<TurnTicket>>,
    registry: Arc<ConnectionRegistry>,
    controller: DialogueController,
    settings: DispatchSettings,
    last_sweep: Instant,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TurnQueue<TurnTicket>>,
        registry: Arc<ConnectionRegistry>,
        controller: DialogueController,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            registry,
            controller,
            settings,
            last_sweep: Instant::now(),
        }
    }

    pub fn controller(&self) -> &DialogueController {
        &self.controller
    }

    /// 主循环，直到 stop 被取消
    pub async fn run(mut self, stop: CancellationToken) {
        tracing::info!(
            idle_timeout_ms = self.settings.idle_timeout.as_millis() as u64,
            turn_interval_ms = self.settings.turn_interval.as_millis() as u64,
            "Dispatch loop started"
        );

        while !stop.is_cancelled() {
            let next = tokio::select! {
                _ = stop.cancelled() => break,
                next = self.queue.next(Some(self.settings.idle_timeout)) => next,
            };

            let outcome = self.cycle(next).await;

            if matches!(outcome, DispatchOutcome::Delivered(_)) && !self.settings.turn_interval.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.turn_interval) => {}
                }
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    /// 单次调度（测试逐步驱动用）
    pub async fn run_once(&mut self) -> DispatchOutcome {
        let next = self.queue.next(Some(self.settings.idle_timeout)).await;
        self.cycle(next).await
    }

    async fn cycle(&mut self, next: Option<(String, TurnTicket)>) -> DispatchOutcome {
        let outcome = match next {
            Some((user_id, ticket)) => self.dispatch(user_id, ticket).await,
            None => DispatchOutcome::Idle,
        };
        // 空闲时必扫；队列一直非空时按周期扫
        if outcome == DispatchOutcome::Idle || self.last_sweep.elapsed() >= self.settings.sweep_interval {
            self.sweep();
        }
        outcome
    }

    fn sweep(&mut self) {
        self.last_sweep = Instant::now();
        let evicted = self.controller.evict_idle();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle conversation contexts");
        }
    }

    async fn dispatch(&mut self, user_id: String, ticket: TurnTicket) -> DispatchOutcome {
        let Some(handle) = self.registry.get(&user_id) else {
            tracing::warn!(user_id = %user_id, "No live connection, dropping conversation");
            self.registry.remove(&user_id);
            self.queue.remove(&user_id);
            return DispatchOutcome::ConnectionMissing(user_id);
        };

        let reply = match self.controller.step(&user_id, ticket.session_id.as_deref()).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user_id = %user_id, "Turn failed, dropping conversation: {}", e);
                self.queue.remove(&user_id);
                return DispatchOutcome::TurnFailed(user_id);
            }
        };

        let pushed = match reply.to_json() {
            Ok(json) => handle.push(json).await,
            Err(e) => Err(TransportError::Serialize(e.to_string())),
        };
        if let Err(e) = pushed {
            // 本轮期间重连的新连接保留队列条目
            if self.registry.remove_if(&user_id, &handle) {
                tracing::warn!(user_id = %user_id, "Push failed, dropping conversation: {}", e);
                self.queue.remove(&user_id);
            } else {
                tracing::info!(user_id = %user_id, "Push to replaced connection failed: {}", e);
            }
            return DispatchOutcome::PushFailed(user_id);
        }

        tracing::debug!(
            user_id = %user_id,
            speaker = ?reply.agent_info.agent_type,
            queued = self.queue.count(),
            "Turn delivered"
        );
        DispatchOutcome::Delivered(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ChannelTransport, ConnectionHandle};
    use crate::dialogue::{ContextStore, ControllerSettings};
    use crate::llm::MockLlmClient;
    use crate::store::MemoryDialogueStore;

    fn dispatcher(queue: Arc<TurnQueue<TurnTicket>>, registry: Arc<ConnectionRegistry>) -> Dispatcher {
        dispatcher_with(queue, registry, Duration::from_secs(60), Duration::from_secs(60))
    }

    fn dispatcher_with(
        queue: Arc<TurnQueue<TurnTicket>>,
        registry: Arc<ConnectionRegistry>,
        context_ttl: Duration,
        sweep_interval: Duration,
    ) -> Dispatcher {
        let controller = DialogueController::new(
            Arc::new(MockLlmClient::new()),
            Arc::new(MemoryDialogueStore::new()),
            ContextStore::new(context_ttl, 8),
            ControllerSettings::default(),
        );
        Dispatcher::new(
            queue,
            registry,
            controller,
            DispatchSettings {
                idle_timeout: Duration::from_millis(20),
                turn_interval: Duration::ZERO,
                sweep_interval,
            },
        )
    }

    #[tokio::test]
    async fn test_idle_when_queue_empty() {
        let mut d = dispatcher(Arc::new(TurnQueue::new()), Arc::new(ConnectionRegistry::new()));
        assert_eq!(d.run_once().await, DispatchOutcome::Idle);
    }

    #[tokio::test]
    async fn test_missing_connection_drops_conversation() {
        let queue = Arc::new(TurnQueue::new());
        let registry = Arc::new(ConnectionRegistry::new());
        queue.add("u1", TurnTicket::default());
        let mut d = dispatcher(queue.clone(), registry.clone());

        assert_eq!(d.run_once().await, DispatchOutcome::ConnectionMissing("u1".into()));
        assert!(!queue.contains("u1"));
        assert!(registry.get("u1").is_none());
    }

    #[tokio::test]
    async fn test_turn_failure_drops_from_queue_only() {
        let queue = Arc::new(TurnQueue::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = ChannelTransport::new();
        let handle: ConnectionHandle = conn.clone();
        registry.upsert("u1", handle);
        queue.add("u1", TurnTicket::default());
        // 空脚本：决策调用直接失败
        let mut d = dispatcher(queue.clone(), registry.clone());

        assert_eq!(d.run_once().await, DispatchOutcome::TurnFailed("u1".into()));
        assert!(!queue.contains("u1"));
        assert!(registry.get("u1").is_some());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_busy_queue_still_sweeps_idle_contexts() {
        let queue = Arc::new(TurnQueue::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let (c1, _rx1) = ChannelTransport::new();
        let (c2, _rx2) = ChannelTransport::new();
        registry.upsert("u1", c1);
        registry.upsert("u2", c2);
        let mut d = dispatcher_with(queue.clone(), registry, Duration::from_millis(50), Duration::ZERO);

        // 空脚本：每轮都失败，但上下文已建好并放回缓存
        queue.add("u1", TurnTicket::default());
        assert_eq!(d.run_once().await, DispatchOutcome::TurnFailed("u1".into()));
        assert!(d.controller().contexts().contains("u1"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.add("u2", TurnTicket::default());
        assert_eq!(d.run_once().await, DispatchOutcome::TurnFailed("u2".into()));

        assert!(!d.controller().contexts().contains("u1"));
        assert!(d.controller().contexts().contains("u2"));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let d = dispatcher(Arc::new(TurnQueue::new()), Arc::new(ConnectionRegistry::new()));
        let stop = CancellationToken::new();
        let task = tokio::spawn(d.run(stop.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatch loop should stop")
            .unwrap();
    }
}
