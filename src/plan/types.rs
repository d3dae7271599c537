//! 计划数据模型
//!
//! Intent / Subtask / Plan / ExecutionStep：规划、执行、重规划与账本之间传递的全部结构，均可 serde 序列化。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolErrorKind, ToolKind};

/// 结构化意图：由 Simplifier 每个任务生成一次，之后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
}

/// 子任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// 合法迁移：PENDING -> RUNNING | SKIPPED，RUNNING -> SUCCEEDED | FAILED | SKIPPED
    pub fn can_transition_to(self, next: SubtaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
        )
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// 计划中的原子工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub tool: ToolKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub deliverable: String,
    /// 声明的备用工具顺序；为空时使用配置中的默认顺序
    #[serde(default)]
    pub fallbacks: Vec<ToolKind>,
    /// 若为恢复子任务，记录被恢复的子任务 ID（恢复子任务不会再被重规划）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_of: Option<String>,
    #[serde(default = "default_status")]
    pub status: SubtaskStatus,
}

fn default_status() -> SubtaskStatus {
    SubtaskStatus::Pending
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, tool: ToolKind) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tool,
            dependencies: Vec::new(),
            success_criteria: String::new(),
            deliverable: String::new(),
            fallbacks: Vec::new(),
            recovery_of: None,
            status: SubtaskStatus::Pending,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_criteria(
        mut self,
        success_criteria: impl Into<String>,
        deliverable: impl Into<String>,
    ) -> Self {
        self.success_criteria = success_criteria.into();
        self.deliverable = deliverable.into();
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<ToolKind>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn is_recovery(&self) -> bool {
        self.recovery_of.is_some()
    }
}

/// 有序子任务 DAG + 分数 + 来源意图；version 每次重规划 +1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub score: f64,
    pub intent: Intent,
    pub subtasks: Vec<Subtask>,
    /// 被恢复子任务替换掉的失败子任务（保留用于审计）
    #[serde(default)]
    pub superseded: Vec<Subtask>,
}

impl Plan {
    pub fn new(intent: Intent, subtasks: Vec<Subtask>, score: f64) -> Self {
        Self {
            version: 1,
            score,
            intent,
            subtasks,
            superseded: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// 仅当前有效的子任务；被取代的子任务不算
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn is_superseded(&self, id: &str) -> bool {
        self.superseded.iter().any(|s| s.id == id)
    }

    /// 尚未进入终态的子任务数
    pub fn open_count(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    pub fn count_with(&self, status: SubtaskStatus) -> usize {
        self.subtasks.iter().filter(|s| s.status == status).count()
    }
}

/// ReAct 单次尝试内的阶段（显式有限状态机）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptPhase {
    Ready,
    Thinking,
    Acting,
    Observing,
    Critiquing,
    Succeeded,
    Retrying,
    Failed,
}

/// Action：选定的工具与结构化输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: ToolKind,
    pub input: Value,
}

/// Observation：工具输出或失败，原样记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    Output { output: Value },
    Error { kind: ObservationErrorKind, message: String },
}

impl Observation {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Output { output } => Some(output),
            Self::Error { .. } => None,
        }
    }
}

/// 观察失败来源：工具失败或模型失败（思考阶段即失败时没有工具输出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationErrorKind {
    Tool(ToolErrorKind),
    Model,
    Contract,
}

/// 自检结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub passed: bool,
    pub reason: String,
}

impl Critique {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// 一次尝试的完整记录；每次尝试无论成败都恰好写入账本一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub subtask_id: String,
    pub attempt: u32,
    pub thought: String,
    pub action: Action,
    pub observation: Observation,
    pub critique: Critique,
    pub transitions: Vec<AttemptPhase>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_status_transitions() {
        assert!(SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Running));
        assert!(SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Skipped));
        assert!(SubtaskStatus::Running.can_transition_to(SubtaskStatus::Failed));
        assert!(!SubtaskStatus::Succeeded.can_transition_to(SubtaskStatus::Running));
        assert!(!SubtaskStatus::Pending.can_transition_to(SubtaskStatus::Succeeded));
    }

    #[test]
    fn test_subtask_deserialize_defaults() {
        let raw = r#"{"id": "step-1", "description": "d", "tool": "generate_text"}"#;
        let s: Subtask = serde_json::from_str(raw).unwrap();
        assert_eq!(s.status, SubtaskStatus::Pending);
        assert!(s.dependencies.is_empty());
        assert!(s.fallbacks.is_empty());
        assert!(!s.is_recovery());
    }

    #[test]
    fn test_observation_serializes_tagged() {
        let obs = Observation::Error {
            kind: ObservationErrorKind::Tool(ToolErrorKind::Timeout),
            message: "slow".into(),
        };
        let v = serde_json::to_value(&obs).unwrap();
        assert_eq!(v["type"], "error");
        assert!(obs.is_error());
        assert!(obs.output().is_none());
    }
}
