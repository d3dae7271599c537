//! 任务状态：状态机、账本内的 TaskState 快照、最终 RunResult
//!
//! TaskState 只由 Ledger 持有与修改；其它组件拿到的都是克隆出来的时间点快照。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{ExecutionStep, Intent, Plan, Subtask, SubtaskStatus};

/// 任务级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Replanning,
    Succeeded,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartialSuccess | Self::Failed | Self::Cancelled
        )
    }

    /// PENDING -> PLANNING -> EXECUTING -> (REPLANNING -> EXECUTING)* -> 终态
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Planning)
                | (Pending, Cancelled)
                | (Planning, Executing)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Executing, Replanning)
                | (Executing, Succeeded)
                | (Executing, PartialSuccess)
                | (Executing, Failed)
                | (Executing, Cancelled)
                | (Replanning, Executing)
                | (Replanning, Failed)
                | (Replanning, Cancelled)
        )
    }

    /// 由最终计划中子任务的状态推出终态
    pub fn from_subtasks(subtasks: &[Subtask]) -> TaskStatus {
        let succeeded = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Succeeded)
            .count();
        if succeeded == 0 {
            TaskStatus::Failed
        } else if succeeded == subtasks.len() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::PartialSuccess
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Planning => "PLANNING",
            Self::Executing => "EXECUTING",
            Self::Replanning => "REPLANNING",
            Self::Succeeded => "SUCCEEDED",
            Self::PartialSuccess => "PARTIAL_SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// 单个任务的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub raw_task: String,
    pub status: TaskStatus,
    pub intent: Option<Intent>,
    pub plan_version: u32,
    /// 当前版本的计划（含实时子任务状态）
    pub plan: Option<Plan>,
    pub history: Vec<ExecutionStep>,
    pub replans: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>, raw_task: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            raw_task: raw_task.into(),
            status: TaskStatus::Pending,
            intent: None,
            plan_version: 0,
            plan: None,
            history: Vec::new(),
            replans: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 某子任务的全部执行步
    pub fn steps_for(&self, subtask_id: &str) -> Vec<&ExecutionStep> {
        self.history
            .iter()
            .filter(|s| s.subtask_id == subtask_id)
            .collect()
    }

    /// 某子任务最近一次成功的输出
    pub fn deliverable_of(&self, subtask_id: &str) -> Option<&serde_json::Value> {
        self.history
            .iter()
            .rev()
            .filter(|s| s.subtask_id == subtask_id && s.critique.passed)
            .find_map(|s| s.observation.output())
    }
}

/// 活跃任务概览（inspection 用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub plan_version: u32,
    pub subtasks: usize,
    pub open_subtasks: usize,
    pub steps: usize,
}

/// 单个子任务的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub attempts: u32,
    /// 是否已被恢复子任务取代
    #[serde(default)]
    pub superseded: bool,
}

/// run_task 的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub plan: Option<Plan>,
    pub results: Vec<SubtaskResult>,
    /// 来自 ledger 的轨迹摘录
    pub memory: Vec<String>,
}

impl RunResult {
    /// 由最终快照构造结果（含被取代的子任务）
    pub fn from_state(state: &TaskState, memory: Vec<String>) -> Self {
        let mut results = Vec::new();
        if let Some(plan) = &state.plan {
            for (subtask, superseded) in plan
                .subtasks
                .iter()
                .map(|s| (s, false))
                .chain(plan.superseded.iter().map(|s| (s, true)))
            {
                results.push(Self::result_for(state, subtask, superseded));
            }
        }
        Self {
            task_id: state.task_id.clone(),
            status: state.status,
            plan: state.plan.clone(),
            results,
            memory,
        }
    }

    fn result_for(state: &TaskState, subtask: &Subtask, superseded: bool) -> SubtaskResult {
        let steps = state.steps_for(&subtask.id);
        let deliverable = if subtask.status == SubtaskStatus::Succeeded {
            state.deliverable_of(&subtask.id).cloned()
        } else {
            None
        };
        let failure_reason = match subtask.status {
            SubtaskStatus::Failed => Some(
                steps
                    .last()
                    .map(|s| s.critique.reason.clone())
                    .unwrap_or_else(|| "failed".to_string()),
            ),
            SubtaskStatus::Skipped => Some("skipped: a dependency did not succeed".to_string()),
            _ => None,
        };
        SubtaskResult {
            subtask_id: subtask.id.clone(),
            status: subtask.status,
            deliverable,
            failure_reason,
            attempts: steps.len() as u32,
            superseded,
        }
    }

    pub fn result(&self, subtask_id: &str) -> Option<&SubtaskResult> {
        self.results.iter().find(|r| r.subtask_id == subtask_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolKind;

    #[test]
    fn test_status_machine() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Planning));
        assert!(Executing.can_transition_to(Replanning));
        assert!(Replanning.can_transition_to(Executing));
        assert!(!Pending.can_transition_to(Executing));
        assert!(!Succeeded.can_transition_to(Executing));
        assert!(!Planning.can_transition_to(Succeeded));
        assert!(PartialSuccess.is_terminal());
    }

    #[test]
    fn test_from_subtasks() {
        let mut a = Subtask::new("a", "a", ToolKind::GenerateText);
        let mut b = Subtask::new("b", "b", ToolKind::GenerateText);
        a.status = SubtaskStatus::Succeeded;
        b.status = SubtaskStatus::Succeeded;
        assert_eq!(TaskStatus::from_subtasks(&[a.clone(), b.clone()]), TaskStatus::Succeeded);
        b.status = SubtaskStatus::Skipped;
        assert_eq!(TaskStatus::from_subtasks(&[a.clone(), b.clone()]), TaskStatus::PartialSuccess);
        a.status = SubtaskStatus::Failed;
        assert_eq!(TaskStatus::from_subtasks(&[a, b]), TaskStatus::Failed);
        assert_eq!(TaskStatus::from_subtasks(&[]), TaskStatus::Failed);
    }

    #[test]
    fn test_status_serializes_screaming() {
        let s = serde_json::to_string(&TaskStatus::PartialSuccess).unwrap();
        assert_eq!(s, "\"PARTIAL_SUCCESS\"");
    }
}
