//! SQLite 存储（sqlx，完全异步）
//!
//! 表结构：
//! - chat_sessions：user_id → session_id
//! - chat_messages：会话内的发言历史
//! - chat_topics：会话内的话题（按目的地分组展示）
//! - personas：数字分身 / 旅行伙伴（kind 区分）
//! - travel_settings：目的地、天数、偏好

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{DialogueStore, HistoryItem, Persona, StoreError, TopicRecord, TravelSettings};

const KIND_AVATAR: &str = "avatar";
const KIND_PARTNER: &str = "partner";

/// SQLite 版 DialogueStore
pub struct SqliteDialogueStore {
    pool: SqlitePool,
}

impl SqliteDialogueStore {
    /// 打开（必要时创建）数据库文件并建表
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                speaker_id TEXT NOT NULL,
                speaker_type TEXT NOT NULL,
                message_id TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                destination TEXT NOT NULL,
                topic TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS personas (
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                persona_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                photo_url TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, kind)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS travel_settings (
                user_id TEXT PRIMARY KEY,
                destination TEXT,
                days INTEGER,
                preference TEXT,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session ON chat_messages(user_id, session_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_topics_session ON chat_topics(user_id, session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 写入数字分身资料（资料维护属于外部 CRUD 层，这里用于初始化与测试）
    pub async fn save_avatar(&self, user_id: &str, persona: &Persona) -> Result<(), StoreError> {
        self.save_persona(user_id, KIND_AVATAR, persona).await
    }

    pub async fn save_partner(&self, user_id: &str, persona: &Persona) -> Result<(), StoreError> {
        self.save_persona(user_id, KIND_PARTNER, persona).await
    }

    pub async fn save_settings(
        &self,
        user_id: &str,
        settings: &TravelSettings,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO travel_settings (user_id, destination, days, preference, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&settings.destination)
        .bind(settings.days)
        .bind(&settings.preference)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_persona(
        &self,
        user_id: &str,
        kind: &str,
        persona: &Persona,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO personas (user_id, kind, persona_id, name, description, photo_url, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(kind)
        .bind(&persona.id)
        .bind(&persona.name)
        .bind(&persona.description)
        .bind(&persona.photo_url)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_persona(&self, user_id: &str, kind: &str) -> Result<Option<Persona>, StoreError> {
        let row = sqlx::query(
            "SELECT persona_id, name, description, photo_url FROM personas WHERE user_id = ? AND kind = ?",
        )
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Persona {
            id: row.try_get("persona_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            photo_url: row.try_get("photo_url")?,
        }))
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DialogueStore for SqliteDialogueStore {
    async fn latest_session(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id FROM chat_sessions WHERE user_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("session_id")?)),
            None => Ok(None),
        }
    }

    async fn create_session(&self, user_id: &str, session_id: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO chat_sessions (session_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_history(
        &self,
        user_id: &str,
        session_id: &str,
        item: &HistoryItem,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_messages (user_id, session_id, speaker_id, speaker_type, message_id, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(&item.speaker_id)
        .bind(item.speaker_role.as_str())
        .bind(&item.message_id)
        .bind(&item.text)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT speaker_id, speaker_type, message_id, message FROM chat_messages
             WHERE user_id = ? AND session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let role: String = row.try_get("speaker_type")?;
            items.push(HistoryItem {
                speaker_id: row.try_get("speaker_id")?,
                speaker_role: role.parse()?,
                message_id: row.try_get("message_id")?,
                text: row.try_get("message")?,
            });
        }
        Ok(items)
    }

    async fn insert_topic(
        &self,
        user_id: &str,
        session_id: &str,
        topic: &TopicRecord,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO chat_topics (user_id, session_id, destination, topic, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(&topic.destination)
        .bind(&topic.title)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_topics(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TopicRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT destination, topic FROM chat_topics
             WHERE user_id = ? AND session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut topics = Vec::with_capacity(rows.len());
        for row in rows {
            topics.push(TopicRecord {
                destination: row.try_get("destination")?,
                title: row.try_get("topic")?,
            });
        }
        Ok(topics)
    }

    async fn avatar(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        self.load_persona(user_id, KIND_AVATAR).await
    }

    async fn partner(&self, user_id: &str) -> Result<Option<Persona>, StoreError> {
        self.load_persona(user_id, KIND_PARTNER).await
    }

    async fn settings(&self, user_id: &str) -> Result<Option<TravelSettings>, StoreError> {
        let row = sqlx::query(
            "SELECT destination, days, preference FROM travel_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TravelSettings {
            destination: row.try_get("destination")?,
            days: row.try_get("days")?,
            preference: row.try_get("preference")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SpeakerRole;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("tripmate.db");

        let store = SqliteDialogueStore::open(&db_path).await.unwrap();
        store.create_session("user_1", "ses_a").await.unwrap();
        store.create_session("user_1", "ses_b").await.unwrap();

        for n in 0..3 {
            let item = HistoryItem {
                speaker_id: "ava_1".to_string(),
                speaker_role: if n % 2 == 0 { SpeakerRole::Avatar } else { SpeakerRole::Partner },
                message_id: format!("msg_{n}"),
                text: format!("第{n}句"),
            };
            store.insert_history("user_1", "ses_b", &item).await.unwrap();
        }
        store
            .insert_topic(
                "user_1",
                "ses_b",
                &TopicRecord {
                    destination: "成都".to_string(),
                    title: "火锅与夜景".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .save_avatar(
                "user_1",
                &Persona {
                    id: "ava_1".to_string(),
                    name: "小白".to_string(),
                    description: Some("爱拍照".to_string()),
                    photo_url: None,
                },
            )
            .await
            .unwrap();
        store
            .save_settings(
                "user_1",
                &TravelSettings {
                    destination: Some("成都".to_string()),
                    days: Some(3),
                    preference: None,
                },
            )
            .await
            .unwrap();
        store.close().await;

        let store = SqliteDialogueStore::open(&db_path).await.unwrap();
        assert_eq!(
            store.latest_session("user_1").await.unwrap().as_deref(),
            Some("ses_b")
        );

        let history = store.recent_history("user_1", "ses_b", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message_id, "msg_1");
        assert_eq!(history[0].speaker_role, SpeakerRole::Partner);
        assert_eq!(history[1].text, "第2句");

        let topics = store.recent_topics("user_1", "ses_b", 10).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "火锅与夜景");

        let avatar = store.avatar("user_1").await.unwrap().unwrap();
        assert_eq!(avatar.name, "小白");
        assert!(store.partner("user_1").await.unwrap().is_none());
        assert_eq!(
            store.settings("user_1").await.unwrap().unwrap().days,
            Some(3)
        );
    }
}
