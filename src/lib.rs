//! Plancraft - LLM 驱动的规划、执行与重规划引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排、任务状态、恢复策略、子任务调度、引擎构建
//! - **llm**: 推理模型抽象、JSON 提取、Mock 实现
//! - **memory**: 任务 ledger（唯一事实来源）与子任务工作记忆
//! - **observability**: tracing 初始化
//! - **plan**: Intent / Subtask / Plan 数据模型与依赖图
//! - **react**: 意图简化、多候选规划、ReAct 子任务执行、评审、重规划
//! - **tools**: 封闭工具集合、注册表与带超时的执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{Engine, EngineBuilder, EngineError, RunResult, TaskStatus};
pub use crate::plan::{Intent, Plan, Subtask, SubtaskStatus};
