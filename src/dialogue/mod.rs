//! 对话层：决策校验、发言角色、会话上下文与控制器

pub mod context;
pub mod context_store;
pub mod controller;
pub mod decision;
pub mod envelope;
pub mod persona;
pub mod prompt;

pub use context::{ContextLimits, ConversationContext, TopicGroup, UNCATEGORIZED};
pub use context_store::ContextStore;
pub use controller::{extract_line, ControllerSettings, DialogueController, SpokenLine};
pub use decision::{parse_decision, Decision, DecisionError, NewTopic, TopicAction, TopicArgs, TurnAction};
pub use envelope::{AgentInfo, Content, Reply};
pub use persona::Speaker;
