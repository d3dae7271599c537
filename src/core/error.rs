//! 引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AttemptFailure 决定 Retry / SwitchTool / GiveUp。

use thiserror::Error;

use crate::llm::ModelError;
use crate::tools::{ToolError, ToolKind};

/// 引擎运行过程中可能出现的错误
///
/// Validation 与 Invariant 由 run_task 以 Err 返回；其余在编排层被转换为 ledger 中的状态。
#[derive(Error, Debug)]
pub enum EngineError {
    /// 输入不合法，不重试
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Replanning error: {0}")]
    Replanning(String),

    /// 环路、非法状态转换、ledger 误用
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

/// 单次尝试失败的原因（由执行循环交给 RecoveryEngine）
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    Tool(ToolError),
    Model(ModelError),
    /// 评审未通过
    Critique(String),
    /// 提示缺少成功标准或交付物
    Contract(String),
}

impl AttemptFailure {
    pub fn message(&self) -> String {
        match self {
            AttemptFailure::Tool(e) => e.to_string(),
            AttemptFailure::Model(e) => e.to_string(),
            AttemptFailure::Critique(reason) => format!("critique failed: {reason}"),
            AttemptFailure::Contract(reason) => format!("prompt contract violated: {reason}"),
        }
    }
}

/// 恢复引擎根据失败类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 同一工具再试一次
    Retry(String),
    /// 换用下一个备用工具
    SwitchTool(ToolKind),
    /// 子任务失败
    GiveUp(String),
}
