//! Replanner：为失败子任务生成恢复子任务并拼接进计划
//!
//! 恢复子任务获得新 ID `<failed>-r<version>-<n>`；根节点继承失败子任务的依赖，
//! 失败子任务的下游改为依赖恢复子任务的汇点；失败子任务移入 superseded，版本号 +1。
//! 草稿本身不合法返回 Replanning 错误；拼接后出现环返回 Invariant 错误。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::state::TaskState;
use crate::core::EngineError;
use crate::llm::{generate_with_timeout, parse_json, GenerationConstraints, ReasoningModel};
use crate::plan::{Plan, PlanGraph, Subtask, SubtaskStatus};
use crate::react::planner::normalize;
use crate::react::rewriter::replan_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecoveryStrategy {
    #[default]
    Alternate,
    Abandon,
}

#[derive(Debug, Deserialize)]
struct RecoveryDraft {
    #[serde(default)]
    strategy: RecoveryStrategy,
    #[serde(default)]
    subtasks: Vec<Subtask>,
}

pub struct Replanner {
    model: Arc<dyn ReasoningModel>,
    constraints: GenerationConstraints,
    timeout: Duration,
}

impl Replanner {
    pub fn new(model: Arc<dyn ReasoningModel>, constraints: GenerationConstraints, timeout: Duration) -> Self {
        Self {
            model,
            constraints,
            timeout,
        }
    }

    /// 基于任务快照为 failed_id 生成下一版本计划（不写 ledger）
    pub async fn replan(&self, state: &TaskState, failed_id: &str) -> Result<Plan, EngineError> {
        let plan = state
            .plan
            .as_ref()
            .ok_or_else(|| EngineError::Invariant(format!("task {} has no plan to repair", state.task_id)))?;
        let failed = plan
            .get(failed_id)
            .ok_or_else(|| EngineError::Invariant(format!("unknown failed subtask {failed_id}")))?;

        let reason = state
            .steps_for(failed_id)
            .last()
            .map(|s| s.critique.reason.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        let completed: Vec<String> = plan
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Succeeded)
            .map(|s| s.id.clone())
            .collect();
        let prompt = replan_prompt(&plan.intent, failed, &reason, &completed);

        let out = generate_with_timeout(self.model.as_ref(), &prompt, &self.constraints, self.timeout)
            .await
            .map_err(|e| EngineError::Replanning(format!("recovery generation failed: {e}")))?;
        let draft: RecoveryDraft = parse_json(&out)
            .map_err(|e| EngineError::Replanning(format!("recovery output unusable: {e}")))?;
        if draft.strategy == RecoveryStrategy::Abandon {
            return Err(EngineError::Replanning(format!("recovery for {failed_id} abandoned")));
        }

        let next = splice(plan, failed_id, normalize(draft.subtasks))?;
        tracing::info!(
            task_id = %state.task_id,
            failed = failed_id,
            version = next.version,
            "recovery spliced"
        );
        Ok(next)
    }
}

/// 把恢复草稿（局部 ID）拼接进计划，返回新版本
pub fn splice(plan: &Plan, failed_id: &str, draft: Vec<Subtask>) -> Result<Plan, EngineError> {
    let failed = plan
        .get(failed_id)
        .ok_or_else(|| EngineError::Invariant(format!("unknown failed subtask {failed_id}")))?
        .clone();
    if failed.is_recovery() {
        return Err(EngineError::Invariant(format!(
            "recovery subtask {failed_id} cannot be replanned"
        )));
    }
    if draft.is_empty() {
        return Err(EngineError::Replanning(format!("empty recovery for {failed_id}")));
    }

    let version = plan.version + 1;
    let mut mapping: HashMap<String, String> = HashMap::new();
    for (n, s) in draft.iter().enumerate() {
        if s.id.is_empty() {
            return Err(EngineError::Replanning("recovery subtask without id".to_string()));
        }
        if s.success_criteria.trim().is_empty() || s.deliverable.trim().is_empty() {
            return Err(EngineError::Replanning(format!(
                "recovery subtask {} lacks success criteria or deliverable",
                s.id
            )));
        }
        let fresh = format!("{failed_id}-r{version}-{}", n + 1);
        if mapping.insert(s.id.clone(), fresh).is_some() {
            return Err(EngineError::Replanning(format!("duplicate recovery id {}", s.id)));
        }
    }

    for s in &draft {
        for dep in &s.dependencies {
            if dep == failed_id {
                return Err(EngineError::Replanning(format!(
                    "recovery subtask {} depends on the failed subtask",
                    s.id
                )));
            }
            if !mapping.contains_key(dep) && !plan.contains(dep) {
                if plan.is_superseded(dep) {
                    return Err(EngineError::Replanning(format!(
                        "recovery subtask {} depends on superseded subtask {dep}",
                        s.id
                    )));
                }
                return Err(EngineError::Replanning(format!(
                    "recovery subtask {} depends on unknown id {dep}",
                    s.id
                )));
            }
        }
    }

    // 草稿内部结构（只看局部依赖）
    let local_view: Vec<Subtask> = draft
        .iter()
        .map(|s| {
            let mut local = s.clone();
            local.dependencies.retain(|d| mapping.contains_key(d));
            local
        })
        .collect();
    PlanGraph::validate(&local_view)
        .map_err(|e| EngineError::Replanning(format!("recovery draft invalid: {e}")))?;

    let mut recovery: Vec<Subtask> = draft
        .into_iter()
        .map(|s| {
            let id = mapping.get(&s.id).cloned().unwrap_or_else(|| s.id.clone());
            let mut deps: Vec<String> = Vec::new();
            for dep in &s.dependencies {
                let mapped = mapping.get(dep).cloned().unwrap_or_else(|| dep.clone());
                if !deps.contains(&mapped) {
                    deps.push(mapped);
                }
            }
            Subtask {
                id,
                dependencies: deps,
                recovery_of: Some(failed_id.to_string()),
                status: SubtaskStatus::Pending,
                ..s
            }
        })
        .collect();

    let recovery_ids: HashSet<String> = recovery.iter().map(|s| s.id.clone()).collect();
    for s in &mut recovery {
        if !s.dependencies.iter().any(|d| recovery_ids.contains(d)) {
            for dep in failed.dependencies.iter().rev() {
                if !s.dependencies.contains(dep) {
                    s.dependencies.insert(0, dep.clone());
                }
            }
        }
    }
    let referenced: HashSet<&str> = recovery
        .iter()
        .flat_map(|s| s.dependencies.iter().map(String::as_str))
        .collect();
    let sinks: Vec<String> = recovery
        .iter()
        .filter(|s| !referenced.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect();

    let mut subtasks = Vec::with_capacity(plan.subtasks.len() + recovery.len());
    let mut recovery = Some(recovery);
    for s in &plan.subtasks {
        if s.id == failed_id {
            subtasks.extend(recovery.take().unwrap_or_default());
            continue;
        }
        let mut s = s.clone();
        if s.dependencies.iter().any(|d| d == failed_id) {
            let mut deps = Vec::new();
            for dep in &s.dependencies {
                let replacement: Vec<String> = if dep == failed_id {
                    sinks.clone()
                } else {
                    vec![dep.clone()]
                };
                for d in replacement {
                    if !deps.contains(&d) {
                        deps.push(d);
                    }
                }
            }
            s.dependencies = deps;
        }
        subtasks.push(s);
    }

    let mut superseded = plan.superseded.clone();
    superseded.push(failed);

    let next = Plan {
        version,
        score: plan.score,
        intent: plan.intent.clone(),
        subtasks,
        superseded,
    };
    PlanGraph::validate(&next.subtasks)
        .map_err(|e| EngineError::Invariant(format!("recovery splice rejected: {e}")))?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Intent;
    use crate::tools::ToolKind;

    fn plan() -> Plan {
        let intent = Intent {
            goal: "party".into(),
            constraints: vec![],
            assumptions: vec![],
        };
        let s = |id: &str, deps: &[&str]| {
            Subtask::new(id, id, ToolKind::GenerateText)
                .depends_on(deps)
                .with_criteria("c", "d")
        };
        let mut p = Plan::new(
            intent,
            vec![s("a", &[]), s("b", &["a"]), s("c", &["b"]), s("d", &["a"])],
            5.0,
        );
        p.subtasks[0].status = SubtaskStatus::Succeeded;
        p.subtasks[1].status = SubtaskStatus::Failed;
        p
    }

    fn draft(items: &[(&str, &[&str])]) -> Vec<Subtask> {
        items
            .iter()
            .map(|(id, deps)| {
                Subtask::new(*id, "recover", ToolKind::GenerateText)
                    .depends_on(deps)
                    .with_criteria("c", "d")
            })
            .collect()
    }

    #[test]
    fn test_splice_rewires_dependencies() {
        let next = splice(&plan(), "b", draft(&[("x", &[]), ("y", &["x"])])).unwrap();
        assert_eq!(next.version, 2);
        let ids: Vec<&str> = next.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b-r2-1", "b-r2-2", "c", "d"]);
        assert_eq!(next.get("b-r2-1").unwrap().dependencies, vec!["a".to_string()]);
        assert_eq!(next.get("b-r2-2").unwrap().dependencies, vec!["b-r2-1".to_string()]);
        assert_eq!(next.get("c").unwrap().dependencies, vec!["b-r2-2".to_string()]);
        assert_eq!(next.superseded.len(), 1);
        assert_eq!(next.superseded[0].status, SubtaskStatus::Failed);
        assert!(next.get("b-r2-1").unwrap().is_recovery());
    }

    #[test]
    fn test_invalid_drafts_are_replanning_errors() {
        let p = plan();
        assert!(matches!(splice(&p, "b", vec![]), Err(EngineError::Replanning(_))));
        assert!(matches!(
            splice(&p, "b", draft(&[("x", &["b"])])),
            Err(EngineError::Replanning(_))
        ));
        assert!(matches!(
            splice(&p, "b", draft(&[("x", &["ghost"])])),
            Err(EngineError::Replanning(_))
        ));
        assert!(matches!(
            splice(&p, "b", draft(&[("x", &["y"]), ("y", &["x"])])),
            Err(EngineError::Replanning(_))
        ));
    }

    #[test]
    fn test_cycle_through_plan_is_invariant() {
        // c 依赖 b；恢复子任务依赖 c 后，c 被改为依赖恢复子任务，形成环
        let err = splice(&plan(), "b", draft(&[("x", &["c"])])).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn test_dependency_on_superseded_subtask_is_replanning_error() {
        let mut p = plan();
        let mut old = Subtask::new("old", "old", ToolKind::GenerateText).with_criteria("c", "d");
        old.status = SubtaskStatus::Failed;
        p.superseded.push(old);
        assert!(p.is_superseded("old"));
        assert!(!p.contains("old"));
        let err = splice(&p, "b", draft(&[("x", &["old"])])).unwrap_err();
        assert!(matches!(err, EngineError::Replanning(_)));
    }

    #[test]
    fn test_recovery_subtasks_not_replanned() {
        let mut p = plan();
        p.subtasks[1].recovery_of = Some("z".into());
        assert!(matches!(
            splice(&p, "b", draft(&[("x", &[])])),
            Err(EngineError::Invariant(_))
        ));
    }
}
