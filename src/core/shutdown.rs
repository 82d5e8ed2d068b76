//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发取消；调度循环与网关监听同一个 token 退出，
//! 之后依次执行清理任务（关闭连接、关闭 SQLite 连接池），每个任务有超时。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::registry::ConnectionRegistry;

/// 触发关闭的原因（只用于日志）
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 进程级关闭信号
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给调度循环、网关等长任务监听
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(?reason, "Shutting down");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Ctrl+C 与（unix 下）SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭阶段的一项清理
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，单项失败或超时只记日志
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    pub async fn run_cleanup(&self) {
        for task in &self.tasks {
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup '{}' done", task.name()),
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", task.name(), e),
                Err(_) => tracing::warn!("Cleanup '{}' timed out after {:?}", task.name(), self.timeout),
            }
        }
    }
}

/// 关闭所有仍在注册表中的连接
pub struct ConnectionsCleanup {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionsCleanup {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for ConnectionsCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let closed = self.registry.close_all();
        tracing::info!(closed, "Closed live connections");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Connections"
    }
}

/// 关闭 SQLite 连接池
#[cfg(feature = "async-sqlite")]
pub struct SqliteCleanup {
    store: Arc<crate::store::SqliteDialogueStore>,
}

#[cfg(feature = "async-sqlite")]
impl SqliteCleanup {
    pub fn new(store: Arc<crate::store::SqliteDialogueStore>) -> Self {
        Self { store }
    }
}

#[cfg(feature = "async-sqlite")]
#[async_trait::async_trait]
impl ShutdownCleanup for SqliteCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.close().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SQLite"
    }
}

/// 运行 app 直到它结束或收到关闭信号，然后执行 cleanup
pub async fn run_with_graceful_shutdown<F, Fut>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("Application finished"),
        _ = manager.wait_for_shutdown() => tracing::info!("Shutdown signal received"),
    }

    cleanup().await;
}
