//! 候选计划评分：特征提取 + 可插拔评分器

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::plan::{Intent, Subtask};

/// 评分所用的计划特征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub subtask_count: usize,
    /// 非首个子任务中，依赖了更早子任务的比例（0..=1）
    pub dependency_coherence: f64,
    /// 意图约束中被计划文本覆盖的比例（无约束时为 1）
    pub constraint_coverage: f64,
    /// 使用的不同工具数
    pub tool_variety: usize,
}

impl PlanFeatures {
    pub fn extract(intent: &Intent, subtasks: &[Subtask]) -> Self {
        Self {
            subtask_count: subtasks.len(),
            dependency_coherence: dependency_coherence(subtasks),
            constraint_coverage: constraint_coverage(intent, subtasks),
            tool_variety: subtasks.iter().map(|s| s.tool).collect::<HashSet<_>>().len(),
        }
    }
}

fn dependency_coherence(subtasks: &[Subtask]) -> f64 {
    if subtasks.len() <= 1 {
        return 1.0;
    }
    let mut seen: HashSet<&str> = HashSet::new();
    let mut linked = 0usize;
    for (i, s) in subtasks.iter().enumerate() {
        if i > 0 && s.dependencies.iter().any(|d| seen.contains(d.as_str())) {
            linked += 1;
        }
        seen.insert(s.id.as_str());
    }
    linked as f64 / (subtasks.len() - 1) as f64
}

fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
        .collect()
}

fn constraint_coverage(intent: &Intent, subtasks: &[Subtask]) -> f64 {
    if intent.constraints.is_empty() {
        return 1.0;
    }
    let plan_words: HashSet<String> = subtasks
        .iter()
        .flat_map(|s| {
            keywords(&format!(
                "{} {} {}",
                s.description, s.success_criteria, s.deliverable
            ))
        })
        .collect();
    let covered = intent
        .constraints
        .iter()
        .filter(|c| keywords(c).iter().any(|w| plan_words.contains(w)))
        .count();
    covered as f64 / intent.constraints.len() as f64
}

/// 评分器 trait
pub trait PlanScorer: Send + Sync {
    fn score(&self, features: &PlanFeatures) -> f64;

    fn name(&self) -> &str {
        "custom"
    }
}

/// 默认启发式：偏好更多子任务（上限 10）、连贯的依赖、覆盖约束、多样的工具
#[derive(Debug, Default, Clone)]
pub struct HeuristicScorer;

impl PlanScorer for HeuristicScorer {
    fn score(&self, f: &PlanFeatures) -> f64 {
        f.subtask_count.min(10) as f64
            + 2.0 * f.dependency_coherence
            + 2.0 * f.constraint_coverage
            + 0.5 * f.tool_variety as f64
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
