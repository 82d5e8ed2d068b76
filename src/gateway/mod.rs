//! WebSocket 推送网关（`gateway` feature）
//!
//! 网关只负责连接生命周期：握手后登记连接、加入轮转队列；断开时按连接身份清理。
//! 推送内容由调度循环产生。

pub mod hub;
pub mod message;

pub use hub::{Gateway, GatewayTimeouts};
pub use message::{ClientFrame, Handshake, HandshakeError};
