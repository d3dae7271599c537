//! 错误恢复引擎
//!
//! 根据 AttemptFailure 返回 RecoveryAction，供执行循环决定是重试、换备用工具还是放弃。

use crate::core::{AttemptFailure, RecoveryAction};
use crate::tools::ToolKind;

/// 单个子任务的尝试预算与备用工具游标
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    pub used: u32,
    pub max: u32,
    /// 尚未使用的备用工具（按声明顺序）
    pub remaining_fallbacks: Vec<ToolKind>,
}

impl AttemptBudget {
    pub fn new(max: u32, fallbacks: Vec<ToolKind>) -> Self {
        Self {
            used: 0,
            max: max.max(1),
            remaining_fallbacks: fallbacks,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// 将尝试失败映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 工具失败优先换备用工具；模型失败与评审失败同工具重试；契约违例直接放弃。
    /// 预算耗尽时一律 GiveUp；SwitchTool 会从 budget 中取走该备用工具。
    pub fn handle(&self, failure: &AttemptFailure, budget: &mut AttemptBudget) -> RecoveryAction {
        if let AttemptFailure::Contract(reason) = failure {
            return RecoveryAction::GiveUp(format!("prompt contract violated: {reason}"));
        }
        if budget.exhausted() {
            return RecoveryAction::GiveUp(format!(
                "retry budget exhausted after {} attempts: {}",
                budget.used,
                failure.message()
            ));
        }
        match failure {
            AttemptFailure::Tool(_) if !budget.remaining_fallbacks.is_empty() => {
                RecoveryAction::SwitchTool(budget.remaining_fallbacks.remove(0))
            }
            other => RecoveryAction::Retry(other.message()),
        }
    }
}
