//! Tripmate - 双角色旅行对话调度器
//!
//! 入口：加载配置、初始化日志、打开 SQLite、启动调度循环与 WebSocket 网关，收到 Ctrl+C / SIGTERM 后优雅退出。
//!
//! 运行方式：
//! ```bash
//! cargo run -- [config/default.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tripmate::config::load_config;
use tripmate::core::shutdown::{run_with_graceful_shutdown, ConnectionsCleanup, SqliteCleanup};
use tripmate::core::{
    ConnectionRegistry, DispatchSettings, Dispatcher, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    TurnQueue,
};
use tripmate::dialogue::DialogueController;
use tripmate::gateway::{Gateway, GatewayTimeouts};
use tripmate::llm::create_llm_from_config;
use tripmate::observability;
use tripmate::store::{DialogueStore, SqliteDialogueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    tracing::info!(
        app = cfg.app.name.as_deref().unwrap_or("tripmate"),
        provider = %cfg.llm.provider,
        model = %cfg.llm.model,
        "Config loaded"
    );

    let sqlite = Arc::new(
        SqliteDialogueStore::open(&cfg.storage.database_path)
            .await
            .with_context(|| format!("Failed to open {}", cfg.storage.database_path.display()))?,
    );
    let store: Arc<dyn DialogueStore> = sqlite.clone();
    let llm = create_llm_from_config(&cfg.llm);

    let queue = Arc::new(TurnQueue::new());
    let registry = Arc::new(ConnectionRegistry::new());

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
    coordinator.register(ConnectionsCleanup::new(Arc::clone(&registry)));
    coordinator.register(SqliteCleanup::new(sqlite));

    let controller = DialogueController::from_config(llm, store, &cfg);
    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        controller,
        DispatchSettings::from(&cfg.scheduler),
    );
    let dispatch_task = tokio::spawn(dispatcher.run(manager.token()));

    let gateway = Arc::new(Gateway::new(queue, registry, GatewayTimeouts::from(&cfg.gateway)));
    let bind_addr = cfg.gateway.bind_addr.clone();
    let token = manager.token();

    run_with_graceful_shutdown(
        Arc::clone(&manager),
        async move {
            if let Err(e) = gateway.run(&bind_addr, token).await {
                tracing::error!("Gateway failed on {}: {}", bind_addr, e);
            }
        },
        move || async move {
            if !manager.is_shutdown() {
                manager.shutdown(ShutdownReason::FatalError("gateway stopped".to_string()));
            }
            if let Err(e) = dispatch_task.await {
                tracing::warn!("Dispatch task ended abnormally: {}", e);
            }
            coordinator.run_cleanup().await;
        },
    )
    .await;

    Ok(())
}
