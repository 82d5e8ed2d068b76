//! 对话控制器：一轮 = 构建上下文 → 决策 → 发言 → 反思 → 更新上下文 → 渲染推送
//!
//! 决策或发言失败直接返回 TurnError；持久化失败只记日志，内存上下文照常更新。

use std::sync::Arc;

use serde::Deserialize;

use super::context::{ContextLimits, ConversationContext};
use super::context_store::ContextStore;
use super::decision::{parse_decision, Decision};
use super::envelope::Reply;
use super::persona::Speaker;
use super::prompt;
use crate::config::AppConfig;
use crate::core::TurnError;
use crate::llm::{GenerationParams, LlmClient, Message};
use crate::store::{DialogueStore, HistoryItem, Persona, TopicRecord};

/// 控制器参数（来自 [llm] 与 [scheduler]）
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub decision: GenerationParams,
    pub speak: GenerationParams,
    /// 写入 prompt 的历史条数
    pub prompt_history: usize,
    pub limits: ContextLimits,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            decision: GenerationParams::default(),
            speak: GenerationParams::default(),
            prompt_history: 5,
            limits: ContextLimits::default(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            decision: GenerationParams {
                temperature: cfg.llm.decision_temperature,
                max_tokens: cfg.llm.max_tokens,
            },
            speak: GenerationParams {
                temperature: cfg.llm.speak_temperature,
                max_tokens: cfg.llm.max_tokens,
            },
            prompt_history: cfg.scheduler.prompt_history,
            limits: ContextLimits {
                history_window: cfg.scheduler.history_window,
                topic_window: cfg.scheduler.topic_window,
            },
        }
    }
}

/// 本轮说出的一句话
#[derive(Debug, Clone)]
pub struct SpokenLine {
    pub speaker: Speaker,
    pub persona: Persona,
    pub message_id: String,
    pub text: String,
}

impl SpokenLine {
    fn history_item(&self) -> HistoryItem {
        HistoryItem {
            speaker_id: self.persona.id.clone(),
            speaker_role: self.speaker.role(),
            message_id: self.message_id.clone(),
            text: self.text.clone(),
        }
    }
}

pub struct DialogueController {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn DialogueStore>,
    contexts: ContextStore,
    settings: ControllerSettings,
}

impl DialogueController {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn DialogueStore>,
        contexts: ContextStore,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            llm,
            store,
            contexts,
            settings,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, store: Arc<dyn DialogueStore>, cfg: &AppConfig) -> Self {
        let contexts = ContextStore::new(cfg.scheduler.context_ttl(), cfg.scheduler.max_contexts);
        Self::new(llm, store, contexts, ControllerSettings::from_config(cfg))
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// 淘汰闲置上下文（调度循环空闲时调用）
    pub fn evict_idle(&mut self) -> usize {
        self.contexts.evict_expired()
    }

    /// 为 user_id 跑一轮对话
    pub async fn step(&mut self, user_id: &str, session_hint: Option<&str>) -> Result<Reply, TurnError> {
        let cached = self
            .contexts
            .take(user_id)
            .filter(|ctx| session_hint.map_or(true, |hint| hint == ctx.session_id()));
        let mut ctx = match cached {
            Some(ctx) => ctx,
            None => {
                ConversationContext::build(self.store.as_ref(), user_id, session_hint, self.settings.limits)
                    .await
            }
        };

        let result = self.run_turn(&mut ctx).await;
        self.contexts.insert(user_id, ctx);
        result
    }

    async fn run_turn(&self, ctx: &mut ConversationContext) -> Result<Reply, TurnError> {
        let decision = self.decide(ctx).await?;
        let line = self.act(ctx, &decision).await?;
        self.reflect(ctx, &decision, &line);
        self.update_context(ctx, &decision, &line).await;

        Ok(Reply::text(
            ctx.user_id(),
            Some(ctx.session_id().to_string()),
            line.speaker.role(),
            &line.persona,
            line.message_id,
            line.text,
        ))
    }

    async fn decide(&self, ctx: &ConversationContext) -> Result<Decision, TurnError> {
        let prompt = prompt::render_decision(ctx, self.settings.prompt_history);
        let raw = self
            .llm
            .complete(&[Message::user(prompt)], &self.settings.decision)
            .await?;
        let decision = parse_decision(&raw)?;
        tracing::debug!(
            user_id = ctx.user_id(),
            turn_action = ?decision.turn_action,
            topic_action = ?decision.topic_action,
            topic = ?decision.speaking_topic(),
            "Decision accepted"
        );
        Ok(decision)
    }

    async fn act(&self, ctx: &ConversationContext, decision: &Decision) -> Result<SpokenLine, TurnError> {
        let speaker = Speaker::from(decision.turn_action);
        let persona = speaker
            .persona(ctx)
            .cloned()
            .ok_or(TurnError::PersonaMissing(speaker))?;

        let prompt = speaker.speak_prompt(ctx, decision, &persona, self.settings.prompt_history);
        let raw = self
            .llm
            .complete(&[Message::user(prompt)], &self.settings.speak)
            .await?;
        let text = extract_line(&raw).ok_or(TurnError::EmptyLine)?;

        Ok(SpokenLine {
            speaker,
            persona,
            message_id: crate::ids::new_message_id(),
            text,
        })
    }

    /// 预留的反思步骤
    fn reflect(&self, _ctx: &ConversationContext, _decision: &Decision, _line: &SpokenLine) {}

    async fn update_context(&self, ctx: &mut ConversationContext, decision: &Decision, line: &SpokenLine) {
        let user_id = ctx.user_id().to_string();
        let session_id = ctx.session_id().to_string();

        if let Some(topic) = decision.opened_topic() {
            let record = TopicRecord {
                destination: ctx.destination().unwrap_or(super::context::UNCATEGORIZED).to_string(),
                title: topic.title.clone(),
            };
            match self.store.insert_topic(&user_id, &session_id, &record).await {
                Ok(()) => tracing::info!(user_id = %user_id, topic = %record.title, "Opened new topic"),
                Err(e) => tracing::warn!(user_id = %user_id, "Persisting topic failed: {}", e),
            }
        }

        let item = line.history_item();
        if let Err(e) = self.store.insert_history(&user_id, &session_id, &item).await {
            tracing::warn!(user_id = %user_id, message_id = %item.message_id, "Persisting history failed: {}", e);
        }
        ctx.update(decision, item);
    }
}

#[derive(Deserialize)]
struct LinePayload {
    #[serde(default)]
    text: Option<String>,
}

/// 台词既可能是 {"text": "..."}（可带 ```json 围栏），也可能是纯文本
pub fn extract_line(raw: &str) -> Option<String> {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```json").or_else(|| body.strip_prefix("```")) {
        body = rest.trim_end().trim_end_matches("```").trim();
    }

    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(payload) = serde_json::from_str::<LinePayload>(&body[start..=end]) {
                return payload
                    .text
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());
            }
        }
    }

    let text = body.trim_matches('"').trim();
    (!text.is_empty()).then(|| text.to_string())
}
