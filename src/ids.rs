//! 消息与会话 ID

use uuid::Uuid;

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn new_session_id() -> String {
    format!("ses_{}", Uuid::new_v4().simple())
}
