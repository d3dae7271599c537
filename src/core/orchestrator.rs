//! 编排层：每个任务一条协调流程
//!
//! 校验 -> 简化意图 -> 多候选规划 -> 按波次并发执行就绪子任务 -> 失败时重规划或跳过下游 ->
//! 计算终态。取消在每个波次前与尝试之间检查；Validation 与 Invariant 以 Err 返回，
//! 其余错误都转为 ledger 中的状态。

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, SkipPolicy};
use crate::core::state::{RunResult, TaskState, TaskStatus, TaskSummary};
use crate::core::{EngineError, TaskScheduler};
use crate::memory::Ledger;
use crate::plan::{ready_subtasks, PlanGraph, Subtask, SubtaskStatus};
use crate::react::events::{send_event, EngineEvent};
use crate::react::{
    ExecutionScope, IntentSimplifier, Planner, Replanner, RewriteContext, SubtaskExecutor,
    SubtaskOutcome,
};

/// 子任务提示中附带的 ledger 摘录条数
const PROMPT_EXCERPTS: usize = 5;

/// 规划/执行/重规划引擎（可跨任务共享）
pub struct Engine {
    pub(crate) config: AppConfig,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) simplifier: IntentSimplifier,
    pub(crate) planner: Planner,
    pub(crate) executor: SubtaskExecutor,
    pub(crate) replanner: Replanner,
    pub(crate) event_tx: Option<UnboundedSender<EngineEvent>>,
}

impl Engine {
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 活跃任务概览
    pub async fn list_active(&self) -> Vec<TaskSummary> {
        self.ledger.list_active().await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskState, EngineError> {
        self.ledger.get(task_id).await
    }

    /// 每个任务独立的子任务许可池
    pub(crate) fn task_scheduler(&self) -> TaskScheduler {
        TaskScheduler::new(self.config.engine.max_concurrent_subtasks)
    }

    /// 以新的 uuid 运行任务
    pub async fn run_task(&self, raw_task: &str) -> Result<RunResult, EngineError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.run_task_with(&task_id, raw_task, CancellationToken::new())
            .await
    }

    /// 运行任务；cancel_token 被取消时尽快结束并标记 CANCELLED
    pub async fn run_task_with(
        &self,
        task_id: &str,
        raw_task: &str,
        cancel_token: CancellationToken,
    ) -> Result<RunResult, EngineError> {
        self.ledger.create_task(task_id, raw_task).await?;
        send_event(
            &self.event_tx,
            EngineEvent::TaskStarted {
                task_id: task_id.to_string(),
            },
        );

        if let Err(e) = self.simplifier.validate(raw_task) {
            tracing::warn!(task_id, error = %e, "task rejected");
            self.ledger.note(task_id, e.to_string()).await?;
            send_event(&self.event_tx, EngineEvent::Error { text: e.to_string() });
            return Err(e);
        }

        self.transition(task_id, TaskStatus::Planning).await?;
        if cancel_token.is_cancelled() {
            return self.cancel(task_id).await;
        }

        let intent = self.simplifier.simplify(raw_task).await?;
        self.ledger.set_intent(task_id, intent.clone()).await?;

        let selection = match self
            .planner
            .plan(&self.ledger, task_id, &intent, self.config.engine.candidate_plans)
            .await
        {
            Ok(selection) => selection,
            Err(EngineError::Planning(reason)) => {
                self.ledger
                    .note(task_id, format!("planning failed: {reason}"))
                    .await?;
                self.transition(task_id, TaskStatus::Failed).await?;
                return self.finish(task_id).await;
            }
            Err(e) => return Err(e),
        };

        let (version, subtasks) = (selection.plan.version, selection.plan.subtasks.len());
        self.ledger.commit_plan(task_id, selection.plan).await?;
        send_event(
            &self.event_tx,
            EngineEvent::PlanCommitted {
                task_id: task_id.to_string(),
                version,
                subtasks,
            },
        );
        self.transition(task_id, TaskStatus::Executing).await?;

        let scheduler = self.task_scheduler();
        loop {
            if cancel_token.is_cancelled() {
                return self.cancel(task_id).await;
            }
            let state = self.ledger.get(task_id).await?;
            let Some(plan) = state.plan.as_ref() else {
                return Err(EngineError::Invariant(format!("task {task_id} lost its plan")));
            };
            let ready = ready_subtasks(&plan.subtasks, self.config.engine.skip_policy);
            if ready.is_empty() {
                break;
            }
            tracing::debug!(task_id, wave = ?ready, "dispatching wave");

            let outcomes = self
                .run_wave(task_id, &state, &ready, &scheduler, &cancel_token)
                .await;
            let mut failed = Vec::new();
            for outcome in outcomes {
                match outcome {
                    Ok(SubtaskOutcome {
                        subtask_id,
                        status: SubtaskStatus::Failed,
                        ..
                    }) => failed.push(subtask_id),
                    Ok(_) | Err(EngineError::Cancelled(_)) => {}
                    Err(e) => return self.abort(task_id, e).await,
                }
            }
            for subtask_id in failed {
                self.handle_failure(task_id, &subtask_id, &cancel_token)
                    .await?;
            }
        }

        if cancel_token.is_cancelled() {
            return self.cancel(task_id).await;
        }
        self.skip_unreachable(task_id).await?;

        let state = self.ledger.get(task_id).await?;
        let status = state
            .plan
            .as_ref()
            .map(|p| TaskStatus::from_subtasks(&p.subtasks))
            .unwrap_or(TaskStatus::Failed);
        self.transition(task_id, status).await?;
        self.finish(task_id).await
    }

    /// 并发执行一个波次（受调度器许可限制）
    async fn run_wave(
        &self,
        task_id: &str,
        state: &TaskState,
        ready: &[String],
        scheduler: &TaskScheduler,
        cancel_token: &CancellationToken,
    ) -> Vec<Result<SubtaskOutcome, EngineError>> {
        let Some(plan) = state.plan.as_ref() else {
            return Vec::new();
        };
        let excerpts = self
            .ledger
            .excerpts(task_id, PROMPT_EXCERPTS)
            .await
            .unwrap_or_default();
        let scope = ExecutionScope {
            ledger: &self.ledger,
            task_id,
            cancel_token,
            event_tx: &self.event_tx,
        };
        let scope = &scope;
        let excerpts = &excerpts;

        let jobs = ready
            .iter()
            .filter_map(|id| plan.get(id))
            .map(move |subtask| async move {
                let _permit = scheduler.acquire_subtask(scope.cancel_token).await?;
                let context = RewriteContext {
                    intent: &plan.intent,
                    dependency_outputs: dependency_outputs(state, subtask),
                    memory_excerpts: excerpts.clone(),
                };
                self.executor.execute(scope, subtask, context).await
            });
        join_all(jobs).await
    }

    /// 失败子任务：可重规划则拼接恢复子任务，否则按策略跳过下游
    async fn handle_failure(
        &self,
        task_id: &str,
        failed_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<(), EngineError> {
        let state = self.ledger.get(task_id).await?;
        let is_recovery = state
            .plan
            .as_ref()
            .and_then(|p| p.get(failed_id))
            .map(Subtask::is_recovery)
            .unwrap_or(false);

        let refusal = if cancel_token.is_cancelled() {
            Some("task cancelled")
        } else if is_recovery {
            Some("recovery subtasks are not replanned")
        } else if state.replans >= self.config.engine.max_replans {
            Some("replan budget exhausted")
        } else {
            None
        };
        if let Some(why) = refusal {
            tracing::info!(task_id, failed = failed_id, why, "not replanning");
            self.ledger
                .note(task_id, format!("{failed_id} not replanned: {why}"))
                .await?;
            return self.skip_dependents(task_id, failed_id).await;
        }

        self.transition(task_id, TaskStatus::Replanning).await?;
        self.ledger.count_replan(task_id).await?;
        match self.replanner.replan(&state, failed_id).await {
            Ok(next) => {
                let version = next.version;
                let recovery: Vec<String> = next
                    .subtasks
                    .iter()
                    .filter(|s| s.recovery_of.as_deref() == Some(failed_id))
                    .map(|s| s.id.clone())
                    .collect();
                let subtasks = next.subtasks.len();
                self.ledger.commit_plan(task_id, next).await?;
                send_event(
                    &self.event_tx,
                    EngineEvent::Replanned {
                        task_id: task_id.to_string(),
                        failed: failed_id.to_string(),
                        version,
                        recovery,
                    },
                );
                send_event(
                    &self.event_tx,
                    EngineEvent::PlanCommitted {
                        task_id: task_id.to_string(),
                        version,
                        subtasks,
                    },
                );
            }
            Err(EngineError::Invariant(msg)) => {
                return self.abort(task_id, EngineError::Invariant(msg)).await.map(|_| ());
            }
            Err(e) => {
                tracing::warn!(task_id, failed = failed_id, error = %e, "replanning failed");
                self.ledger.note(task_id, e.to_string()).await?;
                self.skip_dependents(task_id, failed_id).await?;
            }
        }
        self.transition(task_id, TaskStatus::Executing).await
    }

    /// 按跳过策略把失败子任务的下游标记为 SKIPPED
    async fn skip_dependents(&self, task_id: &str, failed_id: &str) -> Result<(), EngineError> {
        let state = self.ledger.get(task_id).await?;
        let Some(plan) = state.plan.as_ref() else {
            return Ok(());
        };
        let graph = PlanGraph::build(&plan.subtasks)
            .map_err(|e| EngineError::Invariant(e.to_string()))?;
        let targets = match self.config.engine.skip_policy {
            SkipPolicy::Cascade => graph.descendants(failed_id),
            SkipPolicy::OneLevel => graph.dependents(failed_id),
        };
        for id in targets {
            if plan.get(&id).map(|s| s.status) == Some(SubtaskStatus::Pending) {
                self.ledger
                    .set_subtask_status(task_id, &id, SubtaskStatus::Skipped)
                    .await?;
                send_event(
                    &self.event_tx,
                    EngineEvent::SubtaskFinished {
                        subtask_id: id,
                        status: SubtaskStatus::Skipped,
                        attempts: 0,
                    },
                );
            }
        }
        Ok(())
    }

    /// 计划耗尽后仍为 PENDING 的子任务（依赖无法满足）标记为 SKIPPED
    async fn skip_unreachable(&self, task_id: &str) -> Result<(), EngineError> {
        let state = self.ledger.get(task_id).await?;
        let pending: Vec<String> = state
            .plan
            .iter()
            .flat_map(|p| p.subtasks.iter())
            .filter(|s| s.status == SubtaskStatus::Pending)
            .map(|s| s.id.clone())
            .collect();
        for id in pending {
            self.ledger
                .note(task_id, format!("{id} unreachable, skipped"))
                .await?;
            self.ledger
                .set_subtask_status(task_id, &id, SubtaskStatus::Skipped)
                .await?;
        }
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<RunResult, EngineError> {
        let state = self.ledger.get(task_id).await?;
        for subtask in state.plan.iter().flat_map(|p| p.subtasks.iter()) {
            if !subtask.status.is_terminal() {
                self.ledger
                    .set_subtask_status(task_id, &subtask.id, SubtaskStatus::Skipped)
                    .await?;
            }
        }
        tracing::info!(task_id, "task cancelled");
        self.transition(task_id, TaskStatus::Cancelled).await?;
        self.finish(task_id).await
    }

    /// 不变量被破坏：任务 FAILED，错误返回给调用方
    async fn abort(&self, task_id: &str, error: EngineError) -> Result<RunResult, EngineError> {
        tracing::error!(task_id, error = %error, "task aborted");
        if let Err(e) = self.ledger.note(task_id, format!("aborted: {error}")).await {
            tracing::warn!(task_id, error = %e, "failed to record abort note");
        }
        if self.transition(task_id, TaskStatus::Failed).await.is_ok() {
            send_event(
                &self.event_tx,
                EngineEvent::TaskFinished {
                    task_id: task_id.to_string(),
                    status: TaskStatus::Failed,
                },
            );
        }
        Err(error)
    }

    async fn finish(&self, task_id: &str) -> Result<RunResult, EngineError> {
        let state = self.ledger.get(task_id).await?;
        let memory = self
            .ledger
            .excerpts(task_id, self.config.app.memory_excerpts)
            .await?;
        tracing::info!(task_id, status = %state.status, plan_version = state.plan_version, "task finished");
        send_event(
            &self.event_tx,
            EngineEvent::TaskFinished {
                task_id: task_id.to_string(),
                status: state.status,
            },
        );
        Ok(RunResult::from_state(&state, memory))
    }

    async fn transition(&self, task_id: &str, to: TaskStatus) -> Result<(), EngineError> {
        let from = self.ledger.transition(task_id, to).await?;
        send_event(
            &self.event_tx,
            EngineEvent::StatusChanged {
                task_id: task_id.to_string(),
                from,
                to,
            },
        );
        Ok(())
    }
}

/// 依赖子任务的最近成功输出（按依赖声明顺序；跳过的依赖没有输出）
fn dependency_outputs(state: &TaskState, subtask: &Subtask) -> Vec<(String, serde_json::Value)> {
    subtask
        .dependencies
        .iter()
        .filter_map(|dep| state.deliverable_of(dep).map(|out| (dep.clone(), out.clone())))
        .collect()
}
