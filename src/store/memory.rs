//! 内存存储：测试与本地开发用，进程退出即丢失

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DialogueStore, HistoryItem, Persona, StoreError, TopicRecord, TravelSettings};

type SessionKey = (String, String);

#[derive(Default)]
struct Tables {
    /// user_id -> 会话 ID（按创建顺序）
    sessions: HashMap<String, Vec<String>>,
    history: HashMap<SessionKey, Vec<HistoryItem>>,
    /// 按创建顺序追加
    topics: HashMap<SessionKey, Vec<TopicRecord>>,
    avatars: HashMap<String, Persona>,
    partners: HashMap<String, Persona>,
    settings: HashMap<String, TravelSettings>,
}

/// 内存版 DialogueStore；`fail_writes` 打开后所有写操作返回错误，用于验证「写库失败不影响本轮」
#[derive(Default)]
pub struct MemoryDialogueStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryDialogueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_avatar(&self, user_id: &str, persona: Persona) {
        self.tables.write().await.avatars.insert(user_id.to_string(), persona);
    }

    pub async fn put_partner(&self, user_id: &str, persona: Persona) {
        self.tables.write().await.partners.insert(user_id.to_string(), persona);
    }

    pub async fn put_settings(&self, user_id: &str, settings: TravelSettings) {
        self.tables.write().await.settings.insert(user_id.to_string(), settings);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 某会话已写入的全部历史
    pub async fn history_of(&self, user_id: &str, session_id: &str) -> Vec<HistoryItem> {
        self.tables
            .read()
            .await
            .history
            .get(&key(user_id, session_id))
            .cloned()
            .unwrap_or_default()
    }

    /// 某会话已写入的全部话题（创建顺序）
    pub async fn topics_of(&self, user_id: &str, session_id: &str) -> Vec<TopicRecord> {
        self.tables
            .read()
            .await
            .topics
            .get(&key(user_id, session_id))
            .cloned()
            .unwrap_or_default()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("writes disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

fn key(user_id: &str, session_id: &str) -> SessionKey {
    (user_id.to_string(), session_id.to_string())
}

#[async_trait]
impl DialogueStore for MemoryDialogueStore {
    async fn latest_session(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .sessions
            .get(user_id)
            .and_then(|s| s.last().cloned()))
    }

    async fn create_session(&self, user_id: &str, session_id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .sessions
            .entry(user_id.to_string())
            .or_default()
            .push(session_id.to_string());
        Ok(())
    }

    async fn insert_history(
        &self,
        user_id: &str,
        session_id: &str,
        item: &HistoryItem,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .history
            .entry(key(user_id, session_id))
            .or_default()
            .push(item.clone());
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryItem>, StoreError> {
        let tables = self.tables.read().await;
        let items = tables
            .history
            .get(&key(user_id, session_id))
            .map(|h| h[h.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default();
        Ok(items)
    }

    async fn insert_topic(
        &self,
        user_id: &str,
        session_id: &str,
        topic: &TopicRecord,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .topics
            .entry(key(user_id, session_id))
            .or_default()
            .push(topic.clone());
        Ok(())
    }

    async fn recent_topics(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TopicRecord>, StoreError> {
        let tables = self.tables.read().await;
        let topics = tables
            .topics
            .get(&key(user_id, session_id))
            .map(|t| t.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(topics)
    }

    async fn avatar(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        Ok(self.tables.read().await.avatars.get(user_id).cloned())
    }

    async fn partner(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        Ok(self.tables.read().await.partners.get(user_id).cloned())
    }

    async fn settings(&self, user_id: &str) -> Result<Option<TravelSettings>, StoreError> {
        Ok(self.tables.read().await.settings.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SpeakerRole;

    fn item(n: usize) -> HistoryItem {
        HistoryItem {
            speaker_id: "ava_1".to_string(),
            speaker_role: SpeakerRole::Avatar,
            message_id: format!("msg_{n}"),
            text: format!("line {n}"),
        }
    }

    #[tokio::test]
    async fn test_recent_history_keeps_tail_in_order() {
        let store = MemoryDialogueStore::new();
        for n in 0..5 {
            store.insert_history("u1", "s1", &item(n)).await.unwrap();
        }
        let recent = store.recent_history("u1", "s1", 2).await.unwrap();
        assert_eq!(recent, vec![item(3), item(4)]);
        assert!(store.recent_history("u1", "other", 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_topics_newest_first() {
        let store = MemoryDialogueStore::new();
        for title in ["动机", "首日路线", "住宿"] {
            let topic = TopicRecord {
                destination: "京都".to_string(),
                title: title.to_string(),
            };
            store.insert_topic("u1", "s1", &topic).await.unwrap();
        }
        let titles: Vec<_> = store
            .recent_topics("u1", "s1", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["住宿", "首日路线"]);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let store = MemoryDialogueStore::new();
        store.set_fail_writes(true);
        assert!(store.insert_history("u1", "s1", &item(0)).await.is_err());
        assert!(store.create_session("u1", "s1").await.is_err());
        store.set_fail_writes(false);
        store.create_session("u1", "s1").await.unwrap();
        store.create_session("u1", "s2").await.unwrap();
        assert_eq!(store.latest_session("u1").await.unwrap().as_deref(), Some("s2"));
    }
}
