//! Mock 推理能力（用于测试与演示，无需 API）
//!
//! 按提示首行 `### <KIND>` 分派，返回确定性 JSON：
//! - SIMPLIFY：启发式意图
//! - PLAN：按目标关键词（birthday/party、research/study、其它）选择计划模板；候选 2 为精简版
//! - REPLAN：两步恢复计划（诊断 -> 保存）
//! - ACT：围绕子任务描述的 thought，input 为空
//! - CRITIQUE：通过
//!
//! 可按类型覆盖响应、注入失败、预置脚本，并统计各类型调用次数。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{GenerationConstraints, ModelError, ReasoningModel};
use crate::react::rewriter::field;
use crate::react::simplifier::heuristic_intent;
use crate::react::PromptKind;

#[derive(Debug, Clone)]
enum Override {
    Respond(String),
    Fail(ModelError),
}

/// 确定性 Mock 模型
#[derive(Debug, Default)]
pub struct MockReasoning {
    overrides: HashMap<PromptKind, Override>,
    scripts: Mutex<HashMap<PromptKind, VecDeque<Result<String, ModelError>>>>,
    calls: [AtomicUsize; 5],
    delay: Option<Duration>,
}

impl MockReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该类型的提示总是返回 response
    pub fn with_response(mut self, kind: PromptKind, response: impl Into<String>) -> Self {
        self.overrides.insert(kind, Override::Respond(response.into()));
        self
    }

    /// 该类型的提示总是失败
    pub fn failing(mut self, kind: PromptKind, error: ModelError) -> Self {
        self.overrides.insert(kind, Override::Fail(error));
        self
    }

    /// 依次消费的响应；耗尽后回到覆盖或默认行为
    pub fn with_script(self, kind: PromptKind, script: Vec<Result<String, ModelError>>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(kind).or_default().extend(script);
        }
        self
    }

    /// 每次调用前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.calls[slot(kind)].load(Ordering::SeqCst)
    }

    fn scripted(&self, kind: PromptKind) -> Option<Result<String, ModelError>> {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&kind).and_then(|q| q.pop_front()))
    }
}

fn slot(kind: PromptKind) -> usize {
    match kind {
        PromptKind::Simplify => 0,
        PromptKind::Plan => 1,
        PromptKind::Replan => 2,
        PromptKind::Act => 3,
        PromptKind::Critique => 4,
    }
}

#[async_trait]
impl ReasoningModel for MockReasoning {
    async fn generate(
        &self,
        prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<String, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let Some(kind) = PromptKind::detect(prompt) else {
            return Ok(format!("Mock response to: {}", prompt.lines().next().unwrap_or("")));
        };
        self.calls[slot(kind)].fetch_add(1, Ordering::SeqCst);

        if let Some(scripted) = self.scripted(kind) {
            return scripted;
        }
        match self.overrides.get(&kind) {
            Some(Override::Respond(text)) => return Ok(text.clone()),
            Some(Override::Fail(err)) => return Err(err.clone()),
            None => {}
        }

        let value = match kind {
            PromptKind::Simplify => {
                let task = field(prompt, "Task").unwrap_or("");
                serde_json::to_value(heuristic_intent(task))
                    .map_err(|e| ModelError::Backend(e.to_string()))?
            }
            PromptKind::Plan => {
                let goal = field(prompt, "Goal").unwrap_or("");
                let index = field(prompt, "Candidate")
                    .and_then(|c| c.split_whitespace().next())
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(1);
                json!({ "subtasks": candidate_plan(goal, index) })
            }
            PromptKind::Replan => {
                let failed = field(prompt, "Failed subtask").unwrap_or("the failed step");
                let deliverable = field(prompt, "Deliverable").unwrap_or("the missing deliverable");
                recovery_plan(failed, deliverable)
            }
            PromptKind::Act => {
                let task = field(prompt, "Your task").unwrap_or("the subtask");
                json!({ "thought": format!("I will {}", lowercase_first(task)), "input": {} })
            }
            PromptKind::Critique => {
                json!({ "passed": true, "reason": "Observation satisfies the success criteria." })
            }
        };
        Ok(value.to_string())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn lowercase_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn step(id: &str, description: &str, tool: &str, deps: &[&str], criteria: &str, deliverable: &str) -> Value {
    json!({
        "id": id,
        "description": description,
        "tool": tool,
        "dependencies": deps,
        "success_criteria": criteria,
        "deliverable": deliverable,
    })
}

fn template(goal: &str) -> Vec<Value> {
    let lower = goal.to_lowercase();
    if lower.contains("birthday") || lower.contains("party") {
        vec![
            step("step-1", "Clarify constraints: budget, date, and number of guests.", "generate_text", &[],
                "Constraints are listed clearly (budget, date, guest count).", "Short paragraph outlining constraints."),
            step("step-2", "Brainstorm 3-5 party themes and locations.", "generate_text", &["step-1"],
                "At least three distinct theme ideas with possible locations.", "Bulleted list of themes and venues."),
            step("step-3", "Draft an agenda with rough timeline for the party.", "generate_text", &["step-2"],
                "Timeline covers arrival, main activities, food, and wrap-up.", "Timeline with time blocks and activities."),
            step("step-4", "Refine logistics: food, decorations, and supplies checklist.", "modify_data", &["step-2"],
                "Checklist includes items for food, decor, and supplies.", "Structured checklist of logistics items."),
            step("step-5", "Save final birthday party plan to storage.", "save_output", &["step-3", "step-4"],
                "Plan summary is stored and can be retrieved.", "Reference key for the saved plan."),
        ]
    } else if lower.contains("research") || lower.contains("study") {
        vec![
            step("step-1", "Clarify research question and scope.", "generate_text", &[],
                "Clear, single-sentence research question with scope.", "Research question statement."),
            step("step-2", "Identify 3-5 key topics or sub-questions to investigate.", "generate_text", &["step-1"],
                "List of sub-questions covering main aspects of the topic.", "Bulleted list of sub-questions."),
            step("step-3", "Search for relevant sources.", "search_in_files", &["step-2"],
                "At least a few sources or an explicit 'no sources found' note.", "List of source references."),
            step("step-4", "Synthesize findings into a concise summary.", "modify_data", &["step-3"],
                "Summary references the research question and key findings.", "One to three paragraph summary."),
            step("step-5", "Save final research summary to storage.", "save_output", &["step-4"],
                "Summary is stored and can be retrieved.", "Reference key for the saved summary."),
        ]
    } else {
        vec![
            step("step-1", &format!("Understand the task requirements: '{goal}'."), "generate_text", &[],
                "Key constraints and goals are listed.", "Short paragraph summarizing requirements."),
            step("step-2", "Break the task into smaller actionable steps.", "generate_text", &["step-1"],
                "List of 3-7 actionable steps.", "Bulleted list of steps."),
            step("step-3", "Search for any existing relevant information.", "search_in_files", &["step-2"],
                "Either search results or a clear note that nothing was found.", "Search results object."),
            step("step-4", "Transform steps and findings into a concrete plan.", "modify_data", &["step-2", "step-3"],
                "Plan includes sequence and expected outcome.", "Structured plan description."),
            step("step-5", "Save the final plan to storage for later use.", "save_output", &["step-4"],
                "Plan summary is stored and referenced by a key.", "Reference key for the saved plan."),
        ]
    }
}

/// 候选 1 为完整模板；候选 2 为三步精简版；其余为带变体后缀的完整模板
fn candidate_plan(goal: &str, index: usize) -> Vec<Value> {
    let mut steps = template(goal);
    match index {
        1 => steps,
        2 => {
            let mut last = steps.pop().unwrap_or_else(|| json!({}));
            last["dependencies"] = json!(["step-2"]);
            steps.truncate(2);
            steps.push(last);
            steps
        }
        n => {
            for s in &mut steps {
                if let Some(desc) = s["description"].as_str().map(str::to_string) {
                    s["description"] = json!(format!("{desc} (variant {n})"));
                }
            }
            steps
        }
    }
}

fn recovery_plan(failed: &str, deliverable: &str) -> Value {
    json!({
        "strategy": "alternate",
        "subtasks": [
            step("replan-1", &format!("Analyse why {failed} failed and produce the missing content directly."),
                "generate_text", &[], "Summarises what went wrong and provides the missing content.",
                &format!("Diagnostic note standing in for: {deliverable}")),
            step("replan-2", "Save the recovered content to storage.", "save_output", &["replan-1"],
                "Recovered content is stored and referenced by a key.", "Storage key for the recovered content."),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::parse_json;

    fn constraints() -> GenerationConstraints {
        GenerationConstraints::json(256, 0.0)
    }

    #[tokio::test]
    async fn test_plan_templates_by_goal() {
        let mock = MockReasoning::new();
        let out = mock
            .generate("### PLAN\nGoal: Plan a birthday party\nCandidate: 1 of 3\n", &constraints())
            .await
            .unwrap();
        let v: Value = parse_json(&out).unwrap();
        assert_eq!(v["subtasks"].as_array().unwrap().len(), 5);
        assert_eq!(v["subtasks"][3]["tool"], "modify_data");

        let out = mock
            .generate("### PLAN\nGoal: Plan a birthday party\nCandidate: 2 of 3\n", &constraints())
            .await
            .unwrap();
        let v: Value = parse_json(&out).unwrap();
        let steps = v["subtasks"].as_array().unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2]["dependencies"], json!(["step-2"]));
        assert_eq!(mock.calls(PromptKind::Plan), 2);
    }

    #[tokio::test]
    async fn test_overrides_and_scripts() {
        let mock = MockReasoning::new()
            .failing(PromptKind::Act, ModelError::Backend("down".into()))
            .with_script(PromptKind::Critique, vec![Ok("{\"passed\": false, \"reason\": \"thin\"}".into())]);
        assert!(mock.generate("### ACT\nSubtask: a\n", &constraints()).await.is_err());
        let first = mock.generate("### CRITIQUE\n", &constraints()).await.unwrap();
        assert!(first.contains("false"));
        let second = mock.generate("### CRITIQUE\n", &constraints()).await.unwrap();
        assert!(second.contains("true"));
        assert_eq!(mock.calls(PromptKind::Critique), 2);
        assert_eq!(mock.calls(PromptKind::Act), 1);
    }
}
