//! 持久化协作方：对话历史、话题、人设与旅行设置
//!
//! 调度器只通过 DialogueStore 读写；资料的增删改属于外部 CRUD 层。
//! 提供内存实现（测试 / 开发）与 SQLite 实现（`async-sqlite` feature）。

mod memory;
#[cfg(feature = "async-sqlite")]
mod sqlite;

pub use memory::MemoryDialogueStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteDialogueStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 存储层错误；调度器只记录日志，不因此中止一轮对话
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid stored value: {0}")]
    Encoding(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(feature = "async-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// 发言者角色（与历史表 speaker_type 列一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    User,
    Avatar,
    Partner,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::User => "user",
            SpeakerRole::Avatar => "avatar",
            SpeakerRole::Partner => "partner",
        }
    }
}

impl std::fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SpeakerRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SpeakerRole::User),
            "avatar" => Ok(SpeakerRole::Avatar),
            "partner" => Ok(SpeakerRole::Partner),
            other => Err(StoreError::Encoding(format!("unknown speaker role: {other}"))),
        }
    }
}

/// 一条对话历史
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub speaker_id: String,
    pub speaker_role: SpeakerRole,
    pub message_id: String,
    pub text: String,
}

/// 一条话题记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub destination: String,
    pub title: String,
}

/// 人设资料（数字分身或旅行伙伴）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub photo_url: Option<String>,
}

/// 旅行设置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelSettings {
    pub destination: Option<String>,
    pub days: Option<i64>,
    pub preference: Option<String>,
}

/// 对话持久化接口
///
/// 会话维度的读写都以 (user_id, session_id) 定位；人设与设置按 user_id 定位。
#[async_trait]
pub trait DialogueStore: Send + Sync {
    /// 用户最近创建的会话 ID
    async fn latest_session(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn create_session(&self, user_id: &str, session_id: &str) -> Result<(), StoreError>;

    async fn insert_history(
        &self,
        user_id: &str,
        session_id: &str,
        item: &HistoryItem,
    ) -> Result<(), StoreError>;

    /// 最近 limit 条历史，按时间升序
    async fn recent_history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryItem>, StoreError>;

    async fn insert_topic(
        &self,
        user_id: &str,
        session_id: &str,
        topic: &TopicRecord,
    ) -> Result<(), StoreError>;

    /// 最近 limit 个话题，最新的在前
    async fn recent_topics(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TopicRecord>, StoreError>;

    async fn avatar(&self, user_id: &str) -> Result<Option<Persona>, StoreError>;

    async fn partner(&self, user_id: &str) -> Result<Option<Persona>, StoreError>;

    async fn settings(&self, user_id: &str) -> Result<Option<TravelSettings>, StoreError>;
}
