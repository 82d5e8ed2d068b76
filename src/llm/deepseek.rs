//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com/v1
//! - 模型: deepseek-chat（对话决策与台词生成都用它，响应快）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// - API Key 依次取参数、`DEEPSEEK_API_KEY`、`OPENAI_API_KEY`
/// - 模型依次取参数、`DEEPSEEK_MODEL`、`deepseek-chat`
/// - base_url 依次取参数、`DEEPSEEK_BASE_URL`、官方地址
pub fn create_deepseek_client(
    model: Option<&str>,
    base_url: Option<&str>,
    api_key: Option<&str>,
) -> OpenAiClient {
    let api_key = api_key
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .filter(|m| !m.is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    let base_url = base_url
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_BASE_URL").ok())
        .unwrap_or_else(|| DEEPSEEK_BASE_URL.to_string());

    OpenAiClient::new(Some(base_url.as_str()), &model, Some(api_key.as_str()))
}
