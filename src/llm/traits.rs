//! LLM 客户端抽象
//!
//! 调度器只把 LLM 当作「prompt → 原始文本」的黑盒：结构化输出的校验在 dialogue::decision 中完成，
//! 这里不做重试（慢调用会阻塞整个调度循环，由 HTTP 超时兜底）。

use async_trait::async_trait;
use thiserror::Error;

use super::Message;

/// 单次生成的采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// LLM 调用失败
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String, LlmError>;
}
