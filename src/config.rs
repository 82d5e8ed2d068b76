//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIPMATE__*` 覆盖（双下划线表示嵌套，如 `TRIPMATE__LLM__MODEL=deepseek-chat`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub gateway: GatewaySection,
    pub scheduler: SchedulerSection,
    pub storage: StorageSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    /// Thought 决策调用的温度
    pub decision_temperature: f32,
    /// 台词生成调用的温度
    pub speak_temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            decision_temperature: 0.7,
            speak_temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// [gateway] 段：WebSocket 监听与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub bind_addr: String,
    /// 首包握手等待时间（秒）
    pub handshake_timeout_secs: u64,
    /// 无任何入站帧时断开连接的时间（秒），客户端应每 20~30 秒发一次 ping
    pub read_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            handshake_timeout_secs: 15,
            read_timeout_secs: 35,
        }
    }
}

impl GatewaySection {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// [scheduler] 段：调度循环与会话上下文缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 队列为空时单次等待时长（毫秒），也是检查停止信号的周期
    pub idle_timeout_ms: u64,
    /// 每推送一轮后的停顿（毫秒），0 表示不停顿
    pub turn_interval_ms: u64,
    /// 内存中保留的历史条数
    pub history_window: usize,
    /// 渲染进 prompt 的最近历史条数
    pub prompt_history: usize,
    /// 构建上下文时加载的话题条数
    pub topic_window: usize,
    /// 上下文空闲多久后被淘汰（秒）
    pub context_ttl_secs: u64,
    /// 上下文缓存容量上限
    pub max_contexts: usize,
    /// 闲置上下文的清扫周期（秒），队列一直非空时也按此周期执行
    pub context_sweep_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1000,
            turn_interval_ms: 0,
            history_window: 50,
            prompt_history: 5,
            topic_window: 10,
            context_ttl_secs: 3600,
            max_contexts: 1024,
            context_sweep_secs: 60,
        }
    }
}

impl SchedulerSection {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn turn_interval(&self) -> Duration {
        Duration::from_millis(self.turn_interval_ms)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_secs)
    }

    pub fn context_sweep(&self) -> Duration {
        Duration::from_secs(self.context_sweep_secs)
    }
}

/// [storage] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub database_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/tripmate.db"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TRIPMATE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TRIPMATE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIPMATE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.max_tokens, 500);
        assert_eq!(cfg.gateway.read_timeout(), Duration::from_secs(35));
        assert_eq!(cfg.scheduler.prompt_history, 5);
        assert_eq!(cfg.scheduler.idle_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.scheduler.context_sweep(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[scheduler]\nturn_interval_ms = 2500\n\n[gateway]\nbind_addr = \"127.0.0.1:9100\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.scheduler.turn_interval_ms, 2500);
        assert_eq!(cfg.scheduler.history_window, 50);
        assert_eq!(cfg.gateway.bind_addr, "127.0.0.1:9100");
        assert_eq!(cfg.gateway.handshake_timeout_secs, 15);
    }
}
