//! 认知层：意图简化、提示重写、多候选规划与评分、ReAct 子任务执行、评审、重规划、过程事件

pub mod critic;
pub mod events;
pub mod loop_;
pub mod planner;
pub mod replanner;
pub mod rewriter;
pub mod scoring;
pub mod simplifier;

pub use critic::{rule_check, Critic};
pub use events::EngineEvent;
pub use loop_::{ExecutionScope, SubtaskExecutor, SubtaskOutcome};
pub use planner::{validate_subtasks, PlanSelection, Planner};
pub use replanner::{splice, Replanner};
pub use rewriter::{PromptKind, PromptRewriter, RewriteContext, RewrittenPrompt};
pub use scoring::{HeuristicScorer, PlanFeatures, PlanScorer};
pub use simplifier::{heuristic_intent, InputLimits, IntentSimplifier};
