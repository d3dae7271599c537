//! Planner：多候选计划生成、淘汰、评分与选择（Tree-of-Thought）
//!
//! 第 i 个候选使用独立提示与温度 base + 0.1 * i；不合法的候选在评分前被淘汰并保留原因。
//! 选择：最高分；同分取子任务更少者；再同则取最早生成者。全部候选及选择理由写入 ledger。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Deserialize;

use crate::core::EngineError;
use crate::llm::{generate_with_timeout, parse_json, GenerationConstraints, ModelError, ReasoningModel};
use crate::memory::{CandidateRecord, Ledger};
use crate::plan::{Intent, Plan, PlanGraph, Subtask, SubtaskStatus};
use crate::react::rewriter::plan_prompt;
use crate::react::scoring::{PlanFeatures, PlanScorer};
use crate::tools::ToolKind;

#[derive(Debug, Deserialize)]
pub(crate) struct PlanDraft {
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// 候选评估结果
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub subtasks: Vec<Subtask>,
    pub score: Option<f64>,
    pub disqualified: Option<String>,
}

impl Candidate {
    fn record(&self) -> CandidateRecord {
        CandidateRecord {
            index: self.index,
            subtask_count: self.subtasks.len(),
            score: self.score,
            disqualified: self.disqualified.clone(),
        }
    }
}

/// 规划结果：选中的计划（version 1）与全部候选
#[derive(Debug, Clone)]
pub struct PlanSelection {
    pub plan: Plan,
    pub candidates: Vec<CandidateRecord>,
    pub selected: usize,
    pub reason: String,
}

pub struct Planner {
    model: Arc<dyn ReasoningModel>,
    scorer: Arc<dyn PlanScorer>,
    constraints: GenerationConstraints,
    timeout: Duration,
    tools: Vec<(ToolKind, String)>,
}

impl Planner {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        scorer: Arc<dyn PlanScorer>,
        constraints: GenerationConstraints,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            scorer,
            constraints,
            timeout,
            tools: Vec::new(),
        }
    }

    /// 写入规划提示的可用工具说明
    pub fn with_tools(mut self, tools: Vec<(ToolKind, String)>) -> Self {
        self.tools = tools;
        self
    }

    /// 生成 k 个候选并选出一个；候选与选择理由写入 ledger
    pub async fn plan(
        &self,
        ledger: &Ledger,
        task_id: &str,
        intent: &Intent,
        k: usize,
    ) -> Result<PlanSelection, EngineError> {
        let k = k.max(1);
        let candidates = join_all((1..=k).map(|i| self.candidate(intent, i, k))).await;
        let records: Vec<CandidateRecord> = candidates.iter().map(Candidate::record).collect();

        let Some(best) = select(&candidates) else {
            let reason = format!("all {k} candidates disqualified");
            ledger
                .record_candidates(task_id, records, None, reason.clone())
                .await?;
            tracing::warn!(task_id, "{reason}");
            return Err(EngineError::Planning(reason));
        };

        let score = best.score.unwrap_or_default();
        let reason = format!(
            "candidate {} scored {:.2} with {} subtasks ({} scorer)",
            best.index,
            score,
            best.subtasks.len(),
            self.scorer.name()
        );
        ledger
            .record_candidates(task_id, records.clone(), Some(best.index), reason.clone())
            .await?;
        tracing::info!(task_id, candidate = best.index, score, "plan selected");

        Ok(PlanSelection {
            plan: Plan::new(intent.clone(), best.subtasks.clone(), score),
            candidates: records,
            selected: best.index,
            reason,
        })
    }

    async fn candidate(&self, intent: &Intent, index: usize, total: usize) -> Candidate {
        let prompt = plan_prompt(intent, index, total, &self.tools);
        let constraints = self
            .constraints
            .clone()
            .with_temperature(self.constraints.temperature + 0.1 * index as f32);
        let drafted = generate_with_timeout(self.model.as_ref(), &prompt, &constraints, self.timeout)
            .await
            .and_then(|out| parse_json::<PlanDraft>(&out));

        match drafted {
            Err(e) => {
                tracing::debug!(candidate = index, error = %e, "candidate generation failed");
                Candidate {
                    index,
                    subtasks: Vec::new(),
                    score: None,
                    disqualified: Some(describe_model_error(&e)),
                }
            }
            Ok(draft) => {
                let subtasks = normalize(draft.subtasks);
                match validate_subtasks(&subtasks) {
                    Err(reason) => Candidate {
                        index,
                        subtasks,
                        score: None,
                        disqualified: Some(reason),
                    },
                    Ok(()) => {
                        let features = PlanFeatures::extract(intent, &subtasks);
                        Candidate {
                            index,
                            score: Some(self.scorer.score(&features)),
                            subtasks,
                            disqualified: None,
                        }
                    }
                }
            }
        }
    }
}

fn describe_model_error(e: &ModelError) -> String {
    format!("model call failed: {e}")
}

/// 来自模型的子任务一律从 PENDING 开始，且不能自称恢复子任务
pub(crate) fn normalize(subtasks: Vec<Subtask>) -> Vec<Subtask> {
    subtasks
        .into_iter()
        .map(|mut s| {
            s.id = s.id.trim().to_string();
            s.status = SubtaskStatus::Pending;
            s.recovery_of = None;
            s
        })
        .collect()
}

/// 结构校验：非空、ID 唯一、依赖存在、无自依赖、无环、成功标准与交付物非空
pub fn validate_subtasks(subtasks: &[Subtask]) -> Result<(), String> {
    PlanGraph::validate(subtasks).map_err(|e| e.to_string())?;
    if let Some(s) = subtasks.iter().find(|s| s.id.is_empty()) {
        return Err(format!("subtask '{}' has an empty id", s.description));
    }
    if let Some(s) = subtasks.iter().find(|s| s.success_criteria.trim().is_empty()) {
        return Err(format!("subtask {} has no success criteria", s.id));
    }
    if let Some(s) = subtasks.iter().find(|s| s.deliverable.trim().is_empty()) {
        return Err(format!("subtask {} has no deliverable", s.id));
    }
    Ok(())
}

/// 最高分；同分取子任务更少者；再同取更早者
fn select(candidates: &[Candidate]) -> Option<&Candidate> {
    let mut best: Option<&Candidate> = None;
    for c in candidates.iter().filter(|c| c.disqualified.is_none()) {
        let score = c.score.unwrap_or(f64::MIN);
        best = match best {
            None => Some(c),
            Some(b) => {
                let b_score = b.score.unwrap_or(f64::MIN);
                if score > b_score || (score == b_score && c.subtasks.len() < b.subtasks.len()) {
                    Some(c)
                } else {
                    Some(b)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockReasoning;
    use crate::react::scoring::HeuristicScorer;
    use crate::react::PromptKind;

    fn planner(model: MockReasoning) -> Planner {
        Planner::new(
            Arc::new(model),
            Arc::new(HeuristicScorer),
            GenerationConstraints::json(512, 0.2),
            Duration::from_secs(1),
        )
    }

    fn intent(goal: &str) -> Intent {
        Intent {
            goal: goal.into(),
            constraints: vec![],
            assumptions: vec![],
        }
    }

    async fn ledger() -> Ledger {
        let ledger = Ledger::new();
        ledger.create_task("t", "task").await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_selects_full_candidate() {
        let ledger = ledger().await;
        let selection = planner(MockReasoning::new())
            .plan(&ledger, "t", &intent("Plan a birthday party"), 3)
            .await
            .unwrap();
        assert_eq!(selection.selected, 1);
        assert_eq!(selection.plan.version, 1);
        assert_eq!(selection.plan.subtasks.len(), 5);
        assert_eq!(selection.candidates.len(), 3);
        assert!(PlanGraph::validate(&selection.plan.subtasks).is_ok());
        let entries = ledger.entries("t").await.unwrap();
        assert!(entries.iter().any(|e| e.summary().contains("selected #1")));
    }

    #[tokio::test]
    async fn test_cyclic_candidates_disqualified() {
        let cyclic = r#"{"subtasks": [
            {"id": "a", "description": "a", "tool": "generate_text", "dependencies": ["b"], "success_criteria": "x", "deliverable": "y"},
            {"id": "b", "description": "b", "tool": "generate_text", "dependencies": ["a"], "success_criteria": "x", "deliverable": "y"}
        ]}"#;
        let ledger = ledger().await;
        let err = planner(MockReasoning::new().with_response(PromptKind::Plan, cyclic))
            .plan(&ledger, "t", &intent("anything at all"), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Planning(_)));
    }

    #[tokio::test]
    async fn test_disqualified_candidate_skipped() {
        let no_deliverable = r#"{"subtasks": [
            {"id": "a", "description": "a", "tool": "generate_text", "success_criteria": "x"}
        ]}"#;
        let model = MockReasoning::new().with_script(PromptKind::Plan, vec![Ok(no_deliverable.into())]);
        let ledger = ledger().await;
        let selection = planner(model)
            .plan(&ledger, "t", &intent("Plan a research study"), 2)
            .await
            .unwrap();
        let first = &selection.candidates[0];
        assert!(first.disqualified.as_deref().unwrap_or("").contains("deliverable"));
        assert_eq!(selection.selected, 2);
        assert_eq!(selection.plan.subtasks.len(), 3);
    }

    #[test]
    fn test_tie_prefers_fewer_then_earlier() {
        let c = |index, n: usize, score| Candidate {
            index,
            subtasks: (0..n)
                .map(|i| Subtask::new(format!("s{i}"), "d", ToolKind::GenerateText))
                .collect(),
            score: Some(score),
            disqualified: None,
        };
        let tied = [c(1, 4, 5.0), c(2, 3, 5.0), c(3, 3, 5.0)];
        assert_eq!(select(&tied).map(|p| p.index), Some(2));
        let better = [c(1, 4, 5.0), c(2, 3, 6.0)];
        assert_eq!(select(&better).map(|p| p.index), Some(2));
    }
}
