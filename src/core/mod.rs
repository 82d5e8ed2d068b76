//! 调度核心：轮转队列、连接注册表、调度循环、错误类型与优雅关闭

pub mod dispatch;
pub mod error;
pub mod registry;
pub mod shutdown;
pub mod transport;
pub mod turn_queue;

pub use dispatch::{DispatchOutcome, DispatchSettings, Dispatcher, TurnTicket};
pub use error::TurnError;
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use transport::{same_connection, ChannelTransport, ConnectionHandle, Outbound, Transport, TransportError};
pub use turn_queue::TurnQueue;
