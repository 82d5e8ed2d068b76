//! 网关协议：握手与客户端帧

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 握手失败：连接直接关闭，不进入注册表
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("no handshake within timeout")]
    Timeout,

    #[error("connection closed before handshake")]
    Closed,

    #[error("malformed handshake: {0}")]
    Malformed(String),

    #[error("handshake is missing user_id")]
    MissingUserId,

    #[error("transport error: {0}")]
    Transport(String),
}

/// 连接建立后的第一帧：`{"user_id": "...", "session_id": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Deserialize)]
struct RawHandshake {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

impl Handshake {
    pub fn parse(text: &str) -> Result<Self, HandshakeError> {
        let raw: RawHandshake =
            serde_json::from_str(text).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
        let user_id = raw
            .user_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(HandshakeError::MissingUserId)?;
        let session_id = raw
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self { user_id, session_id })
    }
}

/// 握手之后客户端可以发送的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Pong,
    /// 结束本连接
    Stop,
    /// 用户输入（目前只接收不处理）
    Input {
        #[serde(default)]
        text: Option<String>,
    },
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn pong_json() -> String {
        r#"{"type":"pong"}"#.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_parse() {
        let hs = Handshake::parse(r#"{"user_id": " u1 ", "session_id": "ses_1"}"#).unwrap();
        assert_eq!(hs.user_id, "u1");
        assert_eq!(hs.session_id.as_deref(), Some("ses_1"));

        let hs = Handshake::parse(r#"{"user_id": "u2", "session_id": ""}"#).unwrap();
        assert_eq!(hs.session_id, None);
    }

    #[test]
    fn test_handshake_rejects() {
        assert!(matches!(Handshake::parse(r#"{"user_id": "  "}"#), Err(HandshakeError::MissingUserId)));
        assert!(matches!(Handshake::parse(r#"{"session_id": "s"}"#), Err(HandshakeError::MissingUserId)));
        assert!(matches!(Handshake::parse("hello"), Err(HandshakeError::Malformed(_))));
    }

    #[test]
    fn test_client_frames() {
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
        assert_eq!(ClientFrame::parse(r#"{"type":"stop"}"#).unwrap(), ClientFrame::Stop);
        assert_eq!(
            ClientFrame::parse(r#"{"type":"input","text":"去大阪"}"#).unwrap(),
            ClientFrame::Input { text: Some("去大阪".into()) }
        );
        assert!(ClientFrame::parse(r#"{"type":"dance"}"#).is_err());
        assert!(ClientFrame::parse("not json").is_err());

        let pong: ClientFrame = serde_json::from_str(&ClientFrame::pong_json()).unwrap();
        assert_eq!(pong, ClientFrame::Pong);
    }
}
