//! 推送给客户端的一轮消息

use serde::{Deserialize, Serialize};

use crate::store::{Persona, SpeakerRole};

pub const CONTENT_TYPE_TEXT: &str = "text";
pub const CONTENT_MIME: &str = "text/plain; charset=utf-8";
pub const CONTENT_LANG: &str = "zh-CN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_type: SpeakerRole,
    pub agent_name: String,
    pub agent_photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mime: String,
    pub text: String,
    pub lang: String,
}

/// 每轮一条：谁说的、说了什么
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub agent_info: AgentInfo,
    pub contents: Vec<Content>,
}

impl Reply {
    pub fn text(
        user_id: impl Into<String>,
        session_id: Option<String>,
        role: SpeakerRole,
        persona: &Persona,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
            agent_info: AgentInfo {
                agent_id: persona.id.clone(),
                agent_type: role,
                agent_name: persona.name.clone(),
                agent_photo_url: persona.photo_url.clone(),
            },
            contents: vec![Content {
                message_id: message_id.into(),
                kind: CONTENT_TYPE_TEXT.to_string(),
                mime: CONTENT_MIME.to_string(),
                text: text.into(),
                lang: CONTENT_LANG.to_string(),
            }],
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
