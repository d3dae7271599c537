//! 计划层：数据模型与依赖图

pub mod graph;
pub mod types;

pub use graph::{ready_subtasks, PlanGraph, PlanGraphError};
pub use types::{
    Action, AttemptPhase, Critique, ExecutionStep, Intent, Observation, ObservationErrorKind,
    Plan, Subtask, SubtaskStatus,
};
