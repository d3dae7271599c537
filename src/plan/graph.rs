//! 计划依赖图
//!
//! 使用邻接表和入度表实现 DAG 校验、拓扑排序、就绪判定与下游查找。

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::config::SkipPolicy;
use crate::plan::types::{Subtask, SubtaskStatus};

/// 图结构错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanGraphError {
    #[error("Plan has no subtasks")]
    Empty,
    #[error("Duplicate subtask id: {0}")]
    DuplicateId(String),
    #[error("Subtask {subtask} depends on unknown id {dependency}")]
    UnknownDependency { subtask: String, dependency: String },
    #[error("Subtask {0} depends on itself")]
    SelfDependency(String),
    #[error("Cyclic dependency among: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// 计划依赖图
pub struct PlanGraph {
    /// 子任务 ID（保持计划顺序）
    order: Vec<String>,
    /// 邻接表：子任务 ID -> 依赖它的子任务列表
    adjacency: HashMap<String, Vec<String>>,
    /// 入度表：子任务 ID -> 依赖数
    in_degree: HashMap<String, usize>,
}

impl PlanGraph {
    /// 构建依赖图并校验 ID 唯一、依赖存在、无自依赖；不检查环（见 validate）
    pub fn build(subtasks: &[Subtask]) -> Result<Self, PlanGraphError> {
        if subtasks.is_empty() {
            return Err(PlanGraphError::Empty);
        }

        let mut order = Vec::with_capacity(subtasks.len());
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();

        for s in subtasks {
            if adjacency.contains_key(&s.id) {
                return Err(PlanGraphError::DuplicateId(s.id.clone()));
            }
            order.push(s.id.clone());
            adjacency.insert(s.id.clone(), Vec::new());
            in_degree.insert(s.id.clone(), 0);
        }

        for s in subtasks {
            let mut seen = HashSet::new();
            for dep in &s.dependencies {
                if dep == &s.id {
                    return Err(PlanGraphError::SelfDependency(s.id.clone()));
                }
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                let Some(children) = adjacency.get_mut(dep) else {
                    return Err(PlanGraphError::UnknownDependency {
                        subtask: s.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                children.push(s.id.clone());
                *in_degree.entry(s.id.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            order,
            adjacency,
            in_degree,
        })
    }

    /// 构建并要求无环
    pub fn validate(subtasks: &[Subtask]) -> Result<Self, PlanGraphError> {
        let graph = Self::build(subtasks)?;
        graph.topological_order()?;
        Ok(graph)
    }

    /// Kahn 拓扑排序；同层按计划顺序，结果确定
    pub fn topological_order(&self) -> Result<Vec<String>, PlanGraphError> {
        let mut degree = self.in_degree.clone();
        let mut queue: VecDeque<String> = self
            .order
            .iter()
            .filter(|id| degree.get(*id) == Some(&0))
            .cloned()
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            if let Some(children) = self.adjacency.get(&id) {
                for child in children {
                    if let Some(d) = degree.get_mut(child) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
            sorted.push(id);
        }

        if sorted.len() != self.order.len() {
            let remaining = self
                .order
                .iter()
                .filter(|id| !sorted.contains(id))
                .cloned()
                .collect();
            return Err(PlanGraphError::Cycle(remaining));
        }
        Ok(sorted)
    }

    /// 直接依赖 id 的子任务
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.adjacency.get(id).cloned().unwrap_or_default()
    }

    /// 传递闭包下的所有下游子任务（按发现顺序）
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<String> = self.dependents(id).into();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.dependents(&next));
            out.push(next);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 依赖是否已满足：SUCCEEDED，或 one_level 策略下的 SKIPPED（下游容忍缺失交付物）
fn dependency_satisfied(status: SubtaskStatus, policy: SkipPolicy) -> bool {
    match status {
        SubtaskStatus::Succeeded => true,
        SubtaskStatus::Skipped => policy == SkipPolicy::OneLevel,
        _ => false,
    }
}

/// 获取可执行的子任务（PENDING 且所有依赖满足），保持计划顺序
pub fn ready_subtasks(subtasks: &[Subtask], policy: SkipPolicy) -> Vec<String> {
    let status: HashMap<&str, SubtaskStatus> =
        subtasks.iter().map(|s| (s.id.as_str(), s.status)).collect();
    subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Pending)
        .filter(|s| {
            s.dependencies.iter().all(|d| {
                status
                    .get(d.as_str())
                    .is_some_and(|st| dependency_satisfied(*st, policy))
            })
        })
        .map(|s| s.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolKind;

    fn task(id: &str, deps: &[&str]) -> Subtask {
        Subtask::new(id, format!("do {id}"), ToolKind::GenerateText).depends_on(deps)
    }

    #[test]
    fn test_graph_construction_sequential() {
        let tasks = vec![task("a", &[]), task("b", &["a"])];
        let graph = PlanGraph::build(&tasks).unwrap();
        assert_eq!(graph.in_degree.get("a"), Some(&0));
        assert_eq!(graph.in_degree.get("b"), Some(&1));
        assert_eq!(graph.dependents("a"), vec!["b".to_string()]);
    }

    #[test]
    fn test_topological_order_is_deterministic() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let graph = PlanGraph::validate(&tasks).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        let err = PlanGraph::validate(&tasks).err().unwrap();
        assert!(matches!(err, PlanGraphError::Cycle(ids) if ids.len() == 3));
    }

    #[test]
    fn test_unknown_and_self_dependency() {
        let unknown = vec![task("a", &["zzz"])];
        assert!(matches!(
            PlanGraph::build(&unknown).err(),
            Some(PlanGraphError::UnknownDependency { .. })
        ));
        let selfdep = vec![task("a", &["a"])];
        assert_eq!(
            PlanGraph::build(&selfdep).err(),
            Some(PlanGraphError::SelfDependency("a".into()))
        );
        assert_eq!(PlanGraph::build(&[]).err(), Some(PlanGraphError::Empty));
    }

    #[test]
    fn test_duplicate_id() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert_eq!(
            PlanGraph::build(&tasks).err(),
            Some(PlanGraphError::DuplicateId("a".into()))
        );
    }

    #[test]
    fn test_descendants_transitive() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
        ];
        let graph = PlanGraph::build(&tasks).unwrap();
        assert_eq!(graph.descendants("a"), vec!["b", "c"]);
        assert!(graph.descendants("d").is_empty());
    }

    #[test]
    fn test_ready_subtasks_respects_skip_policy() {
        let mut tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &[])];
        tasks[0].status = SubtaskStatus::Skipped;
        tasks[2].status = SubtaskStatus::Succeeded;

        assert!(ready_subtasks(&tasks, SkipPolicy::Cascade).is_empty());
        assert_eq!(ready_subtasks(&tasks, SkipPolicy::OneLevel), vec!["b"]);
    }
}
