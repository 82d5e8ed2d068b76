//! 一轮对话的错误类型
//!
//! 任一错误都不重试：调度循环记录日志并把该会话移出轮转队列。

use thiserror::Error;

use crate::dialogue::{DecisionError, Speaker};
use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("decision rejected: {0}")]
    Decision(#[from] DecisionError),

    #[error("no persona configured for {0}")]
    PersonaMissing(Speaker),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("model returned an empty line")]
    EmptyLine,
}
