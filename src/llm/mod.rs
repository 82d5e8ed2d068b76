//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{GenerationParams, LlmClient, LlmError};

use std::sync::Arc;

use crate::config::LlmSection;

/// 按 [llm] 配置创建客户端：provider=deepseek 时走 DeepSeek 默认地址，其余按 base_url 走 OpenAI 兼容端点
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let api_key = std::env::var(&cfg.api_key_env).ok();
    match cfg.provider.as_str() {
        "deepseek" => Arc::new(create_deepseek_client(
            Some(cfg.model.as_str()),
            cfg.base_url.as_deref(),
            api_key.as_deref(),
        )),
        other => {
            tracing::info!(provider = other, model = %cfg.model, "Using OpenAI-compatible LLM endpoint");
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                api_key.as_deref(),
            ))
        }
    }
}
