//! Tripmate - 双角色旅行对话调度器
//!
//! 为每个在线用户轮流生成「数字分身」与「旅行伙伴」之间的对话，并通过 WebSocket 推送。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 轮转队列、连接注册表、调度循环、优雅关闭
//! - **dialogue**: 决策校验、会话上下文、对话控制器
//! - **gateway**: WebSocket 推送网关（`gateway` feature）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **store**: 对话历史、话题、人设持久化（内存 / SQLite）

pub mod config;
pub mod core;
pub mod dialogue;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod ids;
pub mod llm;
pub mod observability;
pub mod store;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{Dispatcher, TurnQueue, TurnTicket};
pub use crate::dialogue::DialogueController;
