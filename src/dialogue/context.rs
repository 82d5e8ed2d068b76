//! 会话上下文：最近历史、按目的地分组的话题、人设与旅行设置
//!
//! 首轮从存储加载一次，之后每轮由 update 增量修改。只在调度循环内使用，不加锁。

use super::decision::Decision;
use crate::store::{DialogueStore, HistoryItem, Persona, SpeakerRole, TopicRecord, TravelSettings};

/// 未设置目的地时话题归入的分组
pub const UNCATEGORIZED: &str = "未分类";

/// 构建上下文时的加载窗口
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    /// 内存中保留的历史条数
    pub history_window: usize,
    /// 加载的话题条数
    pub topic_window: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            history_window: 50,
            topic_window: 10,
        }
    }
}

/// 同一目的地下的话题，最新的在前
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicGroup {
    pub destination: String,
    pub titles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    user_id: String,
    session_id: String,
    history: Vec<HistoryItem>,
    history_window: usize,
    avatar: Option<Persona>,
    partner: Option<Persona>,
    settings: Option<TravelSettings>,
    topic_groups: Vec<TopicGroup>,
    current_topic: Option<String>,
}

impl ConversationContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>, history_window: usize) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            history: Vec::new(),
            history_window: history_window.max(1),
            avatar: None,
            partner: None,
            settings: None,
            topic_groups: Vec::new(),
            current_topic: None,
        }
    }

    /// 从存储构建：会话 ID（优先 session_hint，其次最近会话，都没有则新建）、话题、历史、人设、设置。
    /// 单项加载失败只记日志，对应字段留空。
    pub async fn build(
        store: &dyn DialogueStore,
        user_id: &str,
        session_hint: Option<&str>,
        limits: ContextLimits,
    ) -> Self {
        let session_id = resolve_session(store, user_id, session_hint).await;
        let mut ctx = Self::new(user_id, session_id, limits.history_window);

        match store.recent_topics(user_id, &ctx.session_id, limits.topic_window).await {
            Ok(topics) => ctx.load_topics(topics),
            Err(e) => tracing::error!(user_id, "Loading topics failed: {}", e),
        }
        match store.recent_history(user_id, &ctx.session_id, limits.history_window).await {
            Ok(items) => ctx.history = items,
            Err(e) => tracing::error!(user_id, "Loading history failed: {}", e),
        }
        match store.avatar(user_id).await {
            Ok(p) => ctx.avatar = p,
            Err(e) => tracing::error!(user_id, "Loading avatar failed: {}", e),
        }
        match store.partner(user_id).await {
            Ok(p) => ctx.partner = p,
            Err(e) => tracing::error!(user_id, "Loading partner failed: {}", e),
        }
        match store.settings(user_id).await {
            Ok(s) => ctx.settings = s,
            Err(e) => tracing::error!(user_id, "Loading travel settings failed: {}", e),
        }

        tracing::info!(
            user_id,
            session_id = %ctx.session_id,
            history = ctx.history.len(),
            topic = ?ctx.current_topic,
            complete = ctx.has_complete_profile(),
            "Conversation context built"
        );
        ctx
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn avatar(&self) -> Option<&Persona> {
        self.avatar.as_ref()
    }

    pub fn partner(&self) -> Option<&Persona> {
        self.partner.as_ref()
    }

    pub fn settings(&self) -> Option<&TravelSettings> {
        self.settings.as_ref()
    }

    pub fn set_avatar(&mut self, persona: Option<Persona>) {
        self.avatar = persona;
    }

    pub fn set_partner(&mut self, persona: Option<Persona>) {
        self.partner = persona;
    }

    pub fn set_settings(&mut self, settings: Option<TravelSettings>) {
        self.settings = settings;
    }

    pub fn has_complete_profile(&self) -> bool {
        self.avatar.is_some() && self.partner.is_some() && self.settings.is_some()
    }

    pub fn avatar_name(&self) -> &str {
        self.avatar.as_ref().map(|p| p.name.as_str()).unwrap_or("未知分身")
    }

    pub fn avatar_description(&self) -> &str {
        self.avatar
            .as_ref()
            .and_then(|p| p.description.as_deref())
            .unwrap_or("暂无描述")
    }

    pub fn partner_name(&self) -> &str {
        self.partner.as_ref().map(|p| p.name.as_str()).unwrap_or("未知伙伴")
    }

    pub fn partner_description(&self) -> &str {
        self.partner
            .as_ref()
            .and_then(|p| p.description.as_deref())
            .unwrap_or("暂无描述")
    }

    /// 话题分组用的目的地
    pub fn destination(&self) -> Option<&str> {
        self.settings
            .as_ref()
            .and_then(|s| s.destination.as_deref())
            .filter(|d| !d.trim().is_empty())
    }

    pub fn destination_text(&self) -> &str {
        self.destination().unwrap_or("未设置目的地")
    }

    pub fn travel_days(&self) -> i64 {
        self.settings.as_ref().and_then(|s| s.days).unwrap_or(0)
    }

    pub fn preference_text(&self) -> &str {
        self.settings
            .as_ref()
            .and_then(|s| s.preference.as_deref())
            .unwrap_or("暂无偏好")
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn current_topic_text(&self) -> &str {
        self.current_topic().unwrap_or("未设置话题")
    }

    pub fn topic_groups(&self) -> &[TopicGroup] {
        &self.topic_groups
    }

    /// 按目的地分组的话题摘要（供模型避免重复）
    pub fn topic_history_summary(&self) -> String {
        if self.topic_groups.is_empty() {
            return "暂无讨论话题".to_string();
        }
        let mut summary = String::new();
        for group in &self.topic_groups {
            summary.push_str(&format!("【{}】\n", group.destination));
            for (i, title) in group.titles.iter().enumerate() {
                summary.push_str(&format!("  {}. {}\n", i + 1, title));
            }
        }
        summary
    }

    /// 最近 count 条历史（升序）
    pub fn recent_history(&self, count: usize) -> &[HistoryItem] {
        &self.history[self.history.len().saturating_sub(count)..]
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// 最近 count 条历史渲染为「名字：台词」，每行一条
    pub fn render_history(&self, count: usize) -> String {
        let recent = self.recent_history(count);
        if recent.is_empty() {
            return "（暂无对话）".to_string();
        }
        recent
            .iter()
            .map(|item| format!("- {}：{}", self.speaker_label(item.speaker_role), item.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn speaker_label(&self, role: SpeakerRole) -> &str {
        match role {
            SpeakerRole::Avatar => self.avatar_name(),
            SpeakerRole::Partner => self.partner_name(),
            SpeakerRole::User => "用户",
        }
    }

    /// records 最新的在前（与 DialogueStore::recent_topics 一致）
    pub fn load_topics(&mut self, records: Vec<TopicRecord>) {
        self.topic_groups.clear();
        self.current_topic = None;
        for record in records.into_iter().rev() {
            self.open_topic(&record.destination, &record.title);
        }
    }

    /// 新建话题：插到目的地分组的最前面，并设为当前话题
    pub fn open_topic(&mut self, destination: &str, title: &str) {
        let destination = if destination.trim().is_empty() {
            UNCATEGORIZED
        } else {
            destination
        };
        match self.topic_groups.iter_mut().find(|g| g.destination == destination) {
            Some(group) => group.titles.insert(0, title.to_string()),
            None => self.topic_groups.push(TopicGroup {
                destination: destination.to_string(),
                titles: vec![title.to_string()],
            }),
        }
        self.current_topic = Some(title.to_string());
    }

    /// 一轮结束后的唯一修改入口：按决策切换话题，并追加本轮台词
    pub fn update(&mut self, decision: &Decision, line: HistoryItem) {
        if let Some(topic) = decision.opened_topic() {
            let destination = self.destination().unwrap_or(UNCATEGORIZED).to_string();
            self.open_topic(&destination, &topic.title);
        }
        self.history.push(line);
        if self.history.len() > self.history_window {
            let excess = self.history.len() - self.history_window;
            self.history.drain(..excess);
        }
    }
}

async fn resolve_session(store: &dyn DialogueStore, user_id: &str, session_hint: Option<&str>) -> String {
    if let Some(hint) = session_hint.filter(|s| !s.trim().is_empty()) {
        return hint.to_string();
    }
    match store.latest_session(user_id).await {
        Ok(Some(session_id)) => return session_id,
        Ok(None) => {}
        Err(e) => tracing::error!(user_id, "Loading latest session failed: {}", e),
    }

    let session_id = crate::ids::new_session_id();
    if let Err(e) = store.create_session(user_id, &session_id).await {
        tracing::warn!(user_id, session_id = %session_id, "Persisting new session failed: {}", e);
    } else {
        tracing::info!(user_id, session_id = %session_id, "Created new session");
    }
    session_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::decision::parse_decision;
    use crate::store::MemoryDialogueStore;

    fn line(role: SpeakerRole, n: usize) -> HistoryItem {
        HistoryItem {
            speaker_id: format!("{}_id", role),
            speaker_role: role,
            message_id: format!("msg_{n}"),
            text: format!("第{n}句"),
        }
    }

    fn settings(destination: &str) -> TravelSettings {
        TravelSettings {
            destination: Some(destination.to_string()),
            days: Some(4),
            preference: Some("人少".to_string()),
        }
    }

    #[test]
    fn test_load_topics_groups_by_destination() {
        let mut ctx = ConversationContext::new("u1", "s1", 10);
        // 最新的在前
        ctx.load_topics(vec![
            TopicRecord { destination: "京都".into(), title: "住宿".into() },
            TopicRecord { destination: "大阪".into(), title: "美食".into() },
            TopicRecord { destination: "京都".into(), title: "动机".into() },
        ]);

        assert_eq!(ctx.current_topic(), Some("住宿"));
        assert_eq!(
            ctx.topic_groups(),
            &[
                TopicGroup { destination: "京都".into(), titles: vec!["住宿".into(), "动机".into()] },
                TopicGroup { destination: "大阪".into(), titles: vec!["美食".into()] },
            ]
        );
        let summary = ctx.topic_history_summary();
        assert!(summary.contains("【京都】"));
        assert!(summary.contains("1. 住宿"));
    }

    #[test]
    fn test_update_rotates_topic_and_appends() {
        let mut ctx = ConversationContext::new("u1", "s1", 10);
        ctx.set_settings(Some(settings("京都")));
        let decision = parse_decision(
            r#"{"turn_action":"SPEAK_AVATAR","topic_action":"END_AND_GENERATE","guidance_list":["推进主题"],"topic_args":{"topic":"动机","new_topic":{"title":"首日路线"}}}"#,
        )
        .unwrap();

        ctx.update(&decision, line(SpeakerRole::Avatar, 1));
        assert_eq!(ctx.current_topic_text(), "首日路线");
        assert_eq!(ctx.topic_groups()[0].destination, "京都");
        assert_eq!(ctx.history_len(), 1);

        let keep = parse_decision(
            r#"{"turn_action":"SPEAK_PARTNER","topic_action":"CONTINUE_TOPIC","guidance_list":["推进主题"],"topic_args":{"topic":"首日路线"}}"#,
        )
        .unwrap();
        ctx.update(&keep, line(SpeakerRole::Partner, 2));
        assert_eq!(ctx.topic_groups()[0].titles.len(), 1);
        assert_eq!(ctx.history_len(), 2);
    }

    #[test]
    fn test_topic_without_destination_is_uncategorized() {
        let mut ctx = ConversationContext::new("u1", "s1", 10);
        ctx.open_topic("", "随便聊聊");
        assert_eq!(ctx.topic_groups()[0].destination, UNCATEGORIZED);
    }

    #[test]
    fn test_history_window_prunes_oldest() {
        let mut ctx = ConversationContext::new("u1", "s1", 3);
        let keep = parse_decision(
            r#"{"turn_action":"SPEAK_PARTNER","topic_action":"CONTINUE_TOPIC","guidance_list":["推进主题"],"topic_args":{"topic":"美食"}}"#,
        )
        .unwrap();
        for n in 0..5 {
            ctx.update(&keep, line(SpeakerRole::Partner, n));
        }
        assert_eq!(ctx.history_len(), 3);
        assert_eq!(ctx.recent_history(1)[0].message_id, "msg_4");
        assert_eq!(ctx.recent_history(10)[0].message_id, "msg_2");
    }

    #[test]
    fn test_placeholders_and_render() {
        let mut ctx = ConversationContext::new("u1", "s1", 10);
        assert_eq!(ctx.avatar_name(), "未知分身");
        assert_eq!(ctx.destination_text(), "未设置目的地");
        assert_eq!(ctx.current_topic_text(), "未设置话题");
        assert_eq!(ctx.render_history(5), "（暂无对话）");
        assert!(!ctx.has_complete_profile());

        ctx.set_avatar(Some(Persona {
            id: "ava".into(),
            name: "小白".into(),
            description: None,
            photo_url: None,
        }));
        ctx.history.push(line(SpeakerRole::Avatar, 1));
        assert_eq!(ctx.render_history(5), "- 小白：第1句");
    }

    #[tokio::test]
    async fn test_build_from_store() {
        let store = MemoryDialogueStore::new();
        store.create_session("u1", "ses_old").await.unwrap();
        store.insert_history("u1", "ses_old", &line(SpeakerRole::Avatar, 1)).await.unwrap();
        store
            .insert_topic("u1", "ses_old", &TopicRecord { destination: "京都".into(), title: "动机".into() })
            .await
            .unwrap();
        store.put_settings("u1", settings("京都")).await;

        let ctx = ConversationContext::build(&store, "u1", None, ContextLimits::default()).await;
        assert_eq!(ctx.session_id(), "ses_old");
        assert_eq!(ctx.history_len(), 1);
        assert_eq!(ctx.current_topic(), Some("动机"));
        assert_eq!(ctx.destination(), Some("京都"));
        assert!(ctx.avatar().is_none());

        let fresh = ConversationContext::build(&store, "u2", None, ContextLimits::default()).await;
        assert!(fresh.session_id().starts_with("ses_"));
        assert_eq!(
            store.latest_session("u2").await.unwrap().as_deref(),
            Some(fresh.session_id())
        );

        let hinted = ConversationContext::build(&store, "u1", Some("ses_new"), ContextLimits::default()).await;
        assert_eq!(hinted.session_id(), "ses_new");
        assert_eq!(hinted.history_len(), 0);
    }
}
