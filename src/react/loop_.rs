//! 子任务执行：显式的 ReAct 有限状态机
//!
//! READY -> THINKING -> ACTING -> OBSERVING -> CRITIQUING -> {SUCCEEDED, RETRYING, FAILED}
//! 每次尝试恰好写入 ledger 一条 ExecutionStep（含经过的阶段）；失败交给 RecoveryEngine
//! 决定重试、换备用工具或放弃。尝试之间检查取消。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsSection;
use crate::core::recovery::AttemptBudget;
use crate::core::{AttemptFailure, EngineError, RecoveryAction, RecoveryEngine};
use crate::llm::{generate_with_timeout, parse_json, GenerationConstraints, ReasoningModel};
use crate::memory::{Ledger, WorkingMemory};
use crate::plan::{
    Action, AttemptPhase, Critique, ExecutionStep, Observation, ObservationErrorKind, Subtask,
    SubtaskStatus,
};
use crate::react::events::{send_event, EngineEvent};
use crate::react::rewriter::{summarize_output, PromptRewriter, RewriteContext, RewrittenPrompt};
use crate::react::Critic;
use crate::tools::{ToolExecutor, ToolKind};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 一次子任务执行所在的任务范围
pub struct ExecutionScope<'a> {
    pub ledger: &'a Ledger,
    pub task_id: &'a str,
    pub cancel_token: &'a CancellationToken,
    pub event_tx: &'a Option<UnboundedSender<EngineEvent>>,
}

/// 子任务执行结果
#[derive(Debug, Clone)]
pub struct SubtaskOutcome {
    pub subtask_id: String,
    pub status: SubtaskStatus,
    pub attempts: u32,
    pub output: Option<Value>,
    pub failure: Option<String>,
}

/// 单次尝试的结果（写入 ledger 前）
struct AttemptRecord {
    thought: String,
    action: Action,
    observation: Observation,
    critique: Critique,
    transitions: Vec<AttemptPhase>,
    failure: Option<AttemptFailure>,
}

#[derive(Debug, Deserialize)]
struct ActDraft {
    #[serde(default)]
    thought: String,
    #[serde(default)]
    input: Value,
}

/// 子任务执行器（引擎内共享，可并发调用）
pub struct SubtaskExecutor {
    model: Arc<dyn ReasoningModel>,
    tools: Arc<ToolExecutor>,
    critic: Arc<Critic>,
    rewriter: PromptRewriter,
    recovery: RecoveryEngine,
    constraints: GenerationConstraints,
    timeout: Duration,
    max_attempts: u32,
    default_fallbacks: ToolsSection,
}

impl SubtaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        tools: Arc<ToolExecutor>,
        critic: Arc<Critic>,
        constraints: GenerationConstraints,
        timeout: Duration,
        max_attempts: u32,
        default_fallbacks: ToolsSection,
    ) -> Self {
        Self {
            model,
            tools,
            critic,
            rewriter: PromptRewriter::new(),
            recovery: RecoveryEngine::new(),
            constraints,
            timeout,
            max_attempts: max_attempts.max(1),
            default_fallbacks,
        }
    }

    /// 声明的备用工具，未声明时取配置默认；去掉主工具、重复项与未注册工具
    pub fn fallbacks_for(&self, subtask: &Subtask) -> Vec<ToolKind> {
        let declared = if subtask.fallbacks.is_empty() {
            self.default_fallbacks.fallbacks_for(subtask.tool)
        } else {
            subtask.fallbacks.clone()
        };
        let mut out: Vec<ToolKind> = Vec::new();
        for kind in declared {
            if kind != subtask.tool && !out.contains(&kind) && self.tools.has_tool(kind) {
                out.push(kind);
            }
        }
        out
    }

    /// 执行一个 PENDING 子任务直到 SUCCEEDED / FAILED（取消时为 SKIPPED）
    pub async fn execute(
        &self,
        scope: &ExecutionScope<'_>,
        subtask: &Subtask,
        context: RewriteContext<'_>,
    ) -> Result<SubtaskOutcome, EngineError> {
        let prompt = self.rewriter.rewrite(subtask, &context);
        let mut budget = AttemptBudget::new(self.max_attempts, self.fallbacks_for(subtask));
        let mut working = WorkingMemory::new();
        let mut tool = subtask.tool;

        scope
            .ledger
            .set_subtask_status(scope.task_id, &subtask.id, SubtaskStatus::Running)
            .await?;
        send_event(
            scope.event_tx,
            EngineEvent::SubtaskStarted {
                subtask_id: subtask.id.clone(),
                tool,
            },
        );

        loop {
            if scope.cancel_token.is_cancelled() {
                tracing::info!(task_id = scope.task_id, subtask_id = %subtask.id, "cancelled between attempts");
                return self
                    .finish(scope, subtask, SubtaskStatus::Skipped, budget.used, None, Some("cancelled".into()))
                    .await;
            }

            budget.used += 1;
            let attempt = budget.used;
            let mut record = self
                .attempt(scope, subtask, &prompt, &context, tool, attempt, &working)
                .await;

            let Some(failure) = record.failure.take() else {
                record.transitions.push(AttemptPhase::Succeeded);
                let output = record.observation.output().cloned();
                self.record_step(scope, subtask, attempt, record).await?;
                return self
                    .finish(scope, subtask, SubtaskStatus::Succeeded, attempt, output, None)
                    .await;
            };

            working.add_attempt(tool, "failed");
            working.add_failure(failure.message());
            let action = self.recovery.handle(&failure, &mut budget);
            tracing::info!(
                task_id = scope.task_id,
                subtask_id = %subtask.id,
                attempt,
                tool = %tool,
                failure = %failure.message(),
                action = ?action,
                "attempt failed"
            );
            let (label, detail) = match &action {
                RecoveryAction::Retry(reason) => ("retry", reason.clone()),
                RecoveryAction::SwitchTool(next) => ("switch_tool", format!("{tool} -> {next}")),
                RecoveryAction::GiveUp(reason) => ("give_up", reason.clone()),
            };
            send_event(
                scope.event_tx,
                EngineEvent::Recovery {
                    subtask_id: subtask.id.clone(),
                    action: label.to_string(),
                    detail: detail.clone(),
                },
            );

            match action {
                RecoveryAction::GiveUp(reason) => {
                    record.transitions.push(AttemptPhase::Failed);
                    self.record_step(scope, subtask, attempt, record).await?;
                    return self
                        .finish(scope, subtask, SubtaskStatus::Failed, attempt, None, Some(reason))
                        .await;
                }
                RecoveryAction::Retry(_) => {
                    record.transitions.push(AttemptPhase::Retrying);
                    self.record_step(scope, subtask, attempt, record).await?;
                }
                RecoveryAction::SwitchTool(next) => {
                    record.transitions.push(AttemptPhase::Retrying);
                    self.record_step(scope, subtask, attempt, record).await?;
                    tool = next;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        scope: &ExecutionScope<'_>,
        subtask: &Subtask,
        prompt: &RewrittenPrompt,
        context: &RewriteContext<'_>,
        tool: ToolKind,
        attempt: u32,
        working: &WorkingMemory,
    ) -> AttemptRecord {
        let mut transitions = vec![AttemptPhase::Ready];

        if let Err(missing) = prompt.validate() {
            return AttemptRecord {
                thought: String::new(),
                action: Action {
                    tool,
                    input: Value::Null,
                },
                observation: Observation::Error {
                    kind: ObservationErrorKind::Contract,
                    message: missing.clone(),
                },
                critique: Critique::fail(format!("prompt contract violated: {missing}")),
                transitions,
                failure: Some(AttemptFailure::Contract(missing)),
            };
        }

        // THINKING
        transitions.push(AttemptPhase::Thinking);
        send_event(
            scope.event_tx,
            EngineEvent::Thinking {
                subtask_id: subtask.id.clone(),
                attempt,
            },
        );
        let mut text = prompt.text();
        if !working.is_empty() {
            text.push('\n');
            text.push_str(&working.to_prompt_section());
        }
        if let Some(t) = self.tools.get_tool(tool) {
            text.push_str(&format!(
                "\n## Tool input JSON Schema ({tool})\n```json\n{}\n```\n",
                t.input_schema()
            ));
        }
        let reply = generate_with_timeout(self.model.as_ref(), &text, &self.constraints, self.timeout).await;
        let (thought, model_input) = match reply {
            Ok(out) => parse_act(&out),
            Err(e) => {
                return AttemptRecord {
                    thought: String::new(),
                    action: Action {
                        tool,
                        input: Value::Null,
                    },
                    observation: Observation::Error {
                        kind: ObservationErrorKind::Model,
                        message: e.to_string(),
                    },
                    critique: Critique::fail(format!("reasoning failed: {e}")),
                    transitions,
                    failure: Some(AttemptFailure::Model(e)),
                };
            }
        };

        // ACTING
        transitions.push(AttemptPhase::Acting);
        let input = tool_input(tool, subtask, &context.dependency_outputs, &model_input);
        send_event(
            scope.event_tx,
            EngineEvent::ToolCall {
                subtask_id: subtask.id.clone(),
                tool,
                input: input.clone(),
            },
        );
        let result = self.tools.execute(tool, input.clone()).await;

        // OBSERVING
        transitions.push(AttemptPhase::Observing);
        let action = Action { tool, input };
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                return AttemptRecord {
                    thought,
                    action,
                    observation: Observation::Error {
                        kind: ObservationErrorKind::Tool(e.kind),
                        message: e.message.clone(),
                    },
                    critique: Critique::fail(format!("tool failed: {e}")),
                    transitions,
                    failure: Some(AttemptFailure::Tool(e)),
                };
            }
        };
        send_event(
            scope.event_tx,
            EngineEvent::Observation {
                subtask_id: subtask.id.clone(),
                tool,
                preview: preview(&output),
            },
        );

        // CRITIQUING
        transitions.push(AttemptPhase::Critiquing);
        let (critique, failure) = match self.critic.critique(subtask, tool, &output).await {
            Ok(c) if c.passed => (c, None),
            Ok(c) => {
                let reason = c.reason.clone();
                (c, Some(AttemptFailure::Critique(reason)))
            }
            Err(e) => (
                Critique::fail(format!("critique failed: {e}")),
                Some(AttemptFailure::Model(e)),
            ),
        };
        send_event(
            scope.event_tx,
            EngineEvent::Critique {
                subtask_id: subtask.id.clone(),
                passed: critique.passed,
                reason: critique.reason.clone(),
            },
        );

        AttemptRecord {
            thought,
            action,
            observation: Observation::Output { output },
            critique,
            transitions,
            failure,
        }
    }

    async fn record_step(
        &self,
        scope: &ExecutionScope<'_>,
        subtask: &Subtask,
        attempt: u32,
        record: AttemptRecord,
    ) -> Result<(), EngineError> {
        let step = ExecutionStep {
            subtask_id: subtask.id.clone(),
            attempt,
            thought: record.thought,
            action: record.action,
            observation: record.observation,
            critique: record.critique,
            transitions: record.transitions,
            recorded_at: Utc::now(),
        };
        scope.ledger.append_step(scope.task_id, step).await
    }

    async fn finish(
        &self,
        scope: &ExecutionScope<'_>,
        subtask: &Subtask,
        status: SubtaskStatus,
        attempts: u32,
        output: Option<Value>,
        failure: Option<String>,
    ) -> Result<SubtaskOutcome, EngineError> {
        scope
            .ledger
            .set_subtask_status(scope.task_id, &subtask.id, status)
            .await?;
        send_event(
            scope.event_tx,
            EngineEvent::SubtaskFinished {
                subtask_id: subtask.id.clone(),
                status,
                attempts,
            },
        );
        Ok(SubtaskOutcome {
            subtask_id: subtask.id.clone(),
            status,
            attempts,
            output,
            failure,
        })
    }
}

/// 解析模型的 {"thought", "input"}；纯文本整体作为 thought
fn parse_act(out: &str) -> (String, Value) {
    match parse_json::<ActDraft>(out) {
        Ok(draft) if !draft.thought.trim().is_empty() => (draft.thought.trim().to_string(), draft.input),
        Ok(draft) => (out.trim().to_string(), draft.input),
        Err(_) => (out.trim().to_string(), Value::Null),
    }
}

/// 工具的基础输入 + 模型给出的字段（同名字段以模型为准）
fn tool_input(
    tool: ToolKind,
    subtask: &Subtask,
    dependency_outputs: &[(String, Value)],
    model_input: &Value,
) -> Value {
    let deps: Map<String, Value> = dependency_outputs
        .iter()
        .map(|(id, out)| (id.clone(), out.clone()))
        .collect();
    let mut base = match tool {
        ToolKind::GenerateText => {
            let mut prompt = format!("{}\nDeliverable: {}", subtask.description, subtask.deliverable);
            for (id, out) in dependency_outputs {
                prompt.push_str(&format!("\nFrom {id}: {}", summarize_output(out)));
            }
            json!({ "prompt": prompt })
        }
        ToolKind::SearchInFiles => json!({ "query": subtask.description }),
        ToolKind::ModifyData if deps.is_empty() => {
            json!({ "data": { "request": subtask.description } })
        }
        ToolKind::ModifyData => json!({ "data": deps }),
        ToolKind::SaveOutput => json!({ "label": subtask.id, "content": deps }),
    };
    if let (Some(base), Some(extra)) = (base.as_object_mut(), model_input.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    base
}

fn preview(output: &Value) -> String {
    let s = output.to_string();
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
