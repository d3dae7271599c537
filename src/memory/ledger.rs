//! 任务账本：进程内、按任务隔离、只追加
//!
//! 外层 RwLock 只保护 task_id -> 记录 的映射，查找后立即释放；
//! 每个任务一把 tokio Mutex，串行化该任务的所有写入，不同任务互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::core::state::{TaskState, TaskStatus, TaskSummary};
use crate::core::EngineError;
use crate::plan::{ExecutionStep, Intent, Plan, SubtaskStatus};

/// 候选计划的评估记录（得分或淘汰原因）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub index: usize,
    pub subtask_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disqualified: Option<String>,
}

/// 账本条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    TaskCreated { raw_task: String },
    StatusChanged { from: TaskStatus, to: TaskStatus },
    IntentRecorded { intent: Intent },
    CandidatesRecorded {
        candidates: Vec<CandidateRecord>,
        selected: Option<usize>,
        reason: String,
    },
    PlanCommitted { version: u32, subtasks: usize, score: f64 },
    SubtaskStatusChanged {
        subtask_id: String,
        from: SubtaskStatus,
        to: SubtaskStatus,
    },
    StepAppended { step: ExecutionStep },
    Note { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

impl LedgerEntry {
    /// 单行摘要（RunResult.memory 使用）
    pub fn summary(&self) -> String {
        let body = match &self.event {
            LedgerEvent::TaskCreated { raw_task } => format!("task created: {raw_task}"),
            LedgerEvent::StatusChanged { from, to } => format!("status {from} -> {to}"),
            LedgerEvent::IntentRecorded { intent } => format!("intent: {}", intent.goal),
            LedgerEvent::CandidatesRecorded {
                candidates,
                selected,
                reason,
            } => match selected {
                Some(i) => format!("{} candidates, selected #{i}: {reason}", candidates.len()),
                None => format!("{} candidates, none selected: {reason}", candidates.len()),
            },
            LedgerEvent::PlanCommitted {
                version,
                subtasks,
                score,
            } => format!("plan v{version} committed ({subtasks} subtasks, score {score:.2})"),
            LedgerEvent::SubtaskStatusChanged { subtask_id, from, to } => {
                format!("subtask {subtask_id}: {from} -> {to}")
            }
            LedgerEvent::StepAppended { step } => format!(
                "step {}#{} via {}: {}",
                step.subtask_id,
                step.attempt,
                step.action.tool,
                if step.critique.passed { "passed" } else { "failed" }
            ),
            LedgerEvent::Note { message } => format!("note: {message}"),
        };
        format!("[{}] {}", self.seq, body)
    }
}

#[derive(Debug)]
struct TaskRecord {
    state: TaskState,
    entries: Vec<LedgerEntry>,
    plan_versions: Vec<Plan>,
}

impl TaskRecord {
    fn push(&mut self, event: LedgerEvent) {
        let now = Utc::now();
        self.entries.push(LedgerEntry {
            seq: self.entries.len() as u64,
            at: now,
            event,
        });
        self.state.updated_at = now;
    }
}

/// 进程级账本
#[derive(Debug, Default)]
pub struct Ledger {
    tasks: RwLock<HashMap<String, Arc<Mutex<TaskRecord>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, task_id: &str) -> Result<Arc<Mutex<TaskRecord>>, EngineError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    /// 新建任务记录（状态 PENDING）；重复 ID 视为账本误用
    pub async fn create_task(&self, task_id: &str, raw_task: &str) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(task_id) {
            return Err(EngineError::Invariant(format!("task {task_id} already exists")));
        }
        let mut record = TaskRecord {
            state: TaskState::new(task_id, raw_task),
            entries: Vec::new(),
            plan_versions: Vec::new(),
        };
        record.push(LedgerEvent::TaskCreated {
            raw_task: raw_task.to_string(),
        });
        tasks.insert(task_id.to_string(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// 任务状态迁移；非法迁移被拒绝。返回迁移前的状态
    pub async fn transition(&self, task_id: &str, to: TaskStatus) -> Result<TaskStatus, EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        let from = rec.state.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::Invariant(format!(
                "illegal task transition {from} -> {to} for {task_id}"
            )));
        }
        rec.state.status = to;
        rec.push(LedgerEvent::StatusChanged { from, to });
        tracing::debug!(task_id, %from, %to, "task status");
        Ok(from)
    }

    /// 写入意图（每个任务只允许一次）
    pub async fn set_intent(&self, task_id: &str, intent: Intent) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        if rec.state.intent.is_some() {
            return Err(EngineError::Invariant(format!("intent for {task_id} is immutable")));
        }
        rec.state.intent = Some(intent.clone());
        rec.push(LedgerEvent::IntentRecorded { intent });
        Ok(())
    }

    pub async fn record_candidates(
        &self,
        task_id: &str,
        candidates: Vec<CandidateRecord>,
        selected: Option<usize>,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        rec.push(LedgerEvent::CandidatesRecorded {
            candidates,
            selected,
            reason: reason.into(),
        });
        Ok(())
    }

    /// 提交新计划版本；版本号必须恰为上一版本 + 1
    pub async fn commit_plan(&self, task_id: &str, plan: Plan) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        let expected = rec.state.plan_version + 1;
        if plan.version != expected {
            return Err(EngineError::Invariant(format!(
                "plan version {} for {task_id}, expected {expected}",
                plan.version
            )));
        }
        rec.state.plan_version = plan.version;
        rec.push(LedgerEvent::PlanCommitted {
            version: plan.version,
            subtasks: plan.subtasks.len(),
            score: plan.score,
        });
        rec.plan_versions.push(plan.clone());
        rec.state.plan = Some(plan);
        Ok(())
    }

    /// 子任务状态迁移；非法迁移或未知子任务被拒绝
    pub async fn set_subtask_status(
        &self,
        task_id: &str,
        subtask_id: &str,
        to: SubtaskStatus,
    ) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        let subtask = rec
            .state
            .plan
            .as_mut()
            .and_then(|p| p.get_mut(subtask_id))
            .ok_or_else(|| {
                EngineError::Invariant(format!("unknown subtask {subtask_id} in {task_id}"))
            })?;
        let from = subtask.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::Invariant(format!(
                "illegal subtask transition {from} -> {to} for {subtask_id}"
            )));
        }
        subtask.status = to;
        rec.push(LedgerEvent::SubtaskStatusChanged {
            subtask_id: subtask_id.to_string(),
            from,
            to,
        });
        Ok(())
    }

    pub async fn append_step(&self, task_id: &str, step: ExecutionStep) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        rec.state.history.push(step.clone());
        rec.push(LedgerEvent::StepAppended { step });
        Ok(())
    }

    pub async fn note(&self, task_id: &str, message: impl Into<String>) -> Result<(), EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        rec.push(LedgerEvent::Note {
            message: message.into(),
        });
        Ok(())
    }

    /// 消耗一次重规划预算；返回消耗后的次数
    pub async fn count_replan(&self, task_id: &str) -> Result<u32, EngineError> {
        let record = self.record(task_id).await?;
        let mut rec = record.lock().await;
        rec.state.replans += 1;
        Ok(rec.state.replans)
    }

    /// 时间点快照
    pub async fn get(&self, task_id: &str) -> Result<TaskState, EngineError> {
        let record = self.record(task_id).await?;
        let rec = record.lock().await;
        Ok(rec.state.clone())
    }

    pub async fn entries(&self, task_id: &str) -> Result<Vec<LedgerEntry>, EngineError> {
        let record = self.record(task_id).await?;
        let rec = record.lock().await;
        Ok(rec.entries.clone())
    }

    /// 所有已提交的计划版本（按版本号升序）
    pub async fn plan_versions(&self, task_id: &str) -> Result<Vec<Plan>, EngineError> {
        let record = self.record(task_id).await?;
        let rec = record.lock().await;
        Ok(rec.plan_versions.clone())
    }

    /// 最近 n 条条目的单行摘要
    pub async fn excerpts(&self, task_id: &str, n: usize) -> Result<Vec<String>, EngineError> {
        let record = self.record(task_id).await?;
        let rec = record.lock().await;
        let skip = rec.entries.len().saturating_sub(n);
        Ok(rec.entries.iter().skip(skip).map(LedgerEntry::summary).collect())
    }

    /// 未进入终态的任务概览
    pub async fn list_active(&self) -> Vec<TaskSummary> {
        let mut out: Vec<TaskSummary> = self
            .list_tasks()
            .await
            .into_iter()
            .filter(|s| !s.status.is_terminal())
            .collect();
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }

    /// 全部任务概览
    pub async fn list_tasks(&self) -> Vec<TaskSummary> {
        let records: Vec<Arc<Mutex<TaskRecord>>> =
            self.tasks.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let rec = record.lock().await;
            let (subtasks, open) = rec
                .state
                .plan
                .as_ref()
                .map(|p| (p.subtasks.len(), p.open_count()))
                .unwrap_or((0, 0));
            out.push(TaskSummary {
                task_id: rec.state.task_id.clone(),
                status: rec.state.status,
                plan_version: rec.state.plan_version,
                subtasks,
                open_subtasks: open,
                steps: rec.state.history.len(),
            });
        }
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }
}
