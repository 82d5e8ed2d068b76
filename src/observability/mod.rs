//! 日志初始化
//!
//! RUST_LOG 优先；未设置时默认 `tripmate=info`。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_DIRECTIVE: &str = "tripmate=info";

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
