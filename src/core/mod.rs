//! 核心编排层：错误与恢复、任务状态、子任务调度、引擎构建与主控流程

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod task_scheduler;

pub use builder::{create_engine_builder, EngineBuilder};
pub use error::{AttemptFailure, EngineError, RecoveryAction};
pub use orchestrator::Engine;
pub use recovery::{AttemptBudget, RecoveryEngine};
pub use state::{RunResult, SubtaskResult, TaskState, TaskStatus, TaskSummary};
pub use task_scheduler::TaskScheduler;
