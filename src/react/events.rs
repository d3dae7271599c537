//! 引擎过程事件：用于实时展示规划、执行、评审与重规划进度

use serde::Serialize;

use crate::core::state::TaskStatus;
use crate::plan::SubtaskStatus;
use crate::tools::ToolKind;

/// 过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskStarted { task_id: String },
    StatusChanged { task_id: String, from: TaskStatus, to: TaskStatus },
    /// 选中计划（含重规划后的新版本）
    PlanCommitted { task_id: String, version: u32, subtasks: usize },
    SubtaskStarted { subtask_id: String, tool: ToolKind },
    Thinking { subtask_id: String, attempt: u32 },
    ToolCall {
        subtask_id: String,
        tool: ToolKind,
        input: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        subtask_id: String,
        tool: ToolKind,
        preview: String,
    },
    Critique { subtask_id: String, passed: bool, reason: String },
    /// 恢复动作（Retry / SwitchTool / GiveUp）
    Recovery { subtask_id: String, action: String, detail: String },
    SubtaskFinished { subtask_id: String, status: SubtaskStatus, attempts: u32 },
    Replanned {
        task_id: String,
        failed: String,
        version: u32,
        recovery: Vec<String>,
    },
    TaskFinished { task_id: String, status: TaskStatus },
    Error { text: String },
}

pub(crate) fn send_event(
    tx: &Option<tokio::sync::mpsc::UnboundedSender<EngineEvent>>,
    ev: EngineEvent,
) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
