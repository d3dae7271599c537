//! Prompt Rewriter：为子任务确定性地拼装提示
//!
//! 子任务提示的分节固定为：Goal / Dependency outputs / Success criteria / Deliverable /
//! Tool guidance / Worked example / Output format。相同输入产生完全相同的分节与文本。
//! 同时负责 Simplifier、Planner、Replanner、Critic 发给模型的提示；每个提示第一行是 `### <KIND>`。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{Intent, Subtask};
use crate::tools::{tool_kind_schema_json, ToolKind};

/// 提示类型（首行 header）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Simplify,
    Plan,
    Replan,
    Act,
    Critique,
}

impl PromptKind {
    pub const ALL: [PromptKind; 5] = [
        PromptKind::Simplify,
        PromptKind::Plan,
        PromptKind::Replan,
        PromptKind::Act,
        PromptKind::Critique,
    ];

    pub fn header(self) -> &'static str {
        match self {
            PromptKind::Simplify => "### SIMPLIFY",
            PromptKind::Plan => "### PLAN",
            PromptKind::Replan => "### REPLAN",
            PromptKind::Act => "### ACT",
            PromptKind::Critique => "### CRITIQUE",
        }
    }

    /// 根据首行识别提示类型
    pub fn detect(prompt: &str) -> Option<PromptKind> {
        let first = prompt.lines().next()?.trim();
        Self::ALL.into_iter().find(|k| k.header() == first)
    }
}

pub const SECTION_GOAL: &str = "Goal";
pub const SECTION_DEPENDENCIES: &str = "Dependency outputs";
pub const SECTION_CRITERIA: &str = "Success criteria";
pub const SECTION_DELIVERABLE: &str = "Deliverable";
pub const SECTION_TOOL_GUIDANCE: &str = "Tool guidance";
pub const SECTION_EXAMPLE: &str = "Worked example";
pub const SECTION_OUTPUT_FORMAT: &str = "Output format";

/// 重写时可用的上下文
#[derive(Debug, Clone)]
pub struct RewriteContext<'a> {
    pub intent: &'a Intent,
    /// (依赖子任务 ID, 其输出)，按依赖声明顺序
    pub dependency_outputs: Vec<(String, Value)>,
    /// 来自 ledger 的近期轨迹摘录
    pub memory_excerpts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSection {
    pub title: String,
    pub body: String,
}

/// 重写后的子任务提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenPrompt {
    pub subtask_id: String,
    pub tool: ToolKind,
    pub sections: Vec<PromptSection>,
}

impl RewrittenPrompt {
    pub fn section(&self, title: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.title == title)
            .map(|s| s.body.as_str())
    }

    /// 成功标准与交付物分节必须存在且非空
    pub fn validate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        for title in [SECTION_CRITERIA, SECTION_DELIVERABLE] {
            if self.section(title).map(|b| b.trim().is_empty()).unwrap_or(true) {
                missing.push(title);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing section(s): {}", missing.join(", ")))
        }
    }

    pub fn text(&self) -> String {
        let mut s = format!(
            "{}\nSubtask: {}\nTool: {}\n",
            PromptKind::Act.header(),
            self.subtask_id,
            self.tool
        );
        for section in &self.sections {
            s.push_str(&format!("\n## {}\n{}\n", section.title, section.body));
        }
        s
    }
}

/// 确定性重写器
#[derive(Debug, Default, Clone)]
pub struct PromptRewriter;

impl PromptRewriter {
    pub fn new() -> Self {
        Self
    }

    pub fn rewrite(&self, subtask: &Subtask, context: &RewriteContext<'_>) -> RewrittenPrompt {
        let sections = vec![
            section(SECTION_GOAL, goal_block(subtask, context)),
            section(SECTION_DEPENDENCIES, dependency_block(subtask, context)),
            section(SECTION_CRITERIA, subtask.success_criteria.trim().to_string()),
            section(SECTION_DELIVERABLE, subtask.deliverable.trim().to_string()),
            section(SECTION_TOOL_GUIDANCE, tool_guidance(subtask.tool).to_string()),
            section(SECTION_EXAMPLE, worked_example(subtask.tool).to_string()),
            section(
                SECTION_OUTPUT_FORMAT,
                "Reply with one JSON object: {\"thought\": \"<reasoning>\", \"input\": {<tool input fields>}}"
                    .to_string(),
            ),
        ];
        tracing::debug!(subtask_id = %subtask.id, tool = %subtask.tool, "prompt rewritten");
        RewrittenPrompt {
            subtask_id: subtask.id.clone(),
            tool: subtask.tool,
            sections,
        }
    }
}

fn section(title: &str, body: String) -> PromptSection {
    PromptSection {
        title: title.to_string(),
        body,
    }
}

fn goal_block(subtask: &Subtask, context: &RewriteContext<'_>) -> String {
    let mut parts = vec![
        format!("Overall goal: {}", context.intent.goal),
        format!("Your task: {}", subtask.description),
    ];
    if !context.intent.constraints.is_empty() {
        parts.push(format!("Constraints: {}", context.intent.constraints.join("; ")));
    }
    if !context.memory_excerpts.is_empty() {
        parts.push("Recent activity:".to_string());
        parts.extend(context.memory_excerpts.iter().map(|e| format!("- {e}")));
    }
    parts.join("\n")
}

fn dependency_block(subtask: &Subtask, context: &RewriteContext<'_>) -> String {
    if subtask.dependencies.is_empty() {
        return "None.".to_string();
    }
    subtask
        .dependencies
        .iter()
        .map(|dep| {
            let summary = context
                .dependency_outputs
                .iter()
                .find(|(id, _)| id == dep)
                .map(|(_, out)| summarize_output(out))
                .unwrap_or_else(|| "no output available".to_string());
            format!("- From {dep}: {summary}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 工具输出的单行摘要
pub fn summarize_output(output: &Value) -> String {
    if let Some(text) = output.get("text").and_then(|v| v.as_str()) {
        if text.chars().count() > 150 {
            return format!("{}...", text.chars().take(150).collect::<String>());
        }
        return text.to_string();
    }
    if let Some(results) = output.get("results").and_then(|v| v.as_array()) {
        return format!("{} results found", results.len());
    }
    if let Some(summary) = output.get("summary").and_then(|v| v.as_str()) {
        return summary.to_string();
    }
    if let Some(key) = output.get("key").and_then(|v| v.as_str()) {
        return format!("stored as {key}");
    }
    "completed successfully".to_string()
}

fn tool_guidance(tool: ToolKind) -> &'static str {
    match tool {
        ToolKind::GenerateText => {
            "Be specific and concrete. Use clear structure. Include all requested information."
        }
        ToolKind::SearchInFiles => {
            "Use relevant keywords. No results is a valid outcome. Extract the most relevant findings."
        }
        ToolKind::ModifyData => {
            "Preserve important structure from previous outputs. Make transformations explicit. Summarize what changed."
        }
        ToolKind::SaveOutput => {
            "Collect the relevant outputs from prior steps. Use a descriptive label. Confirm storage succeeded."
        }
    }
}

fn worked_example(tool: ToolKind) -> &'static str {
    match tool {
        ToolKind::GenerateText => {
            r#"{"thought": "List the constraints first", "input": {"prompt": "List budget, date and guest count"}}"#
        }
        ToolKind::SearchInFiles => {
            r#"{"thought": "Look for prior notes", "input": {"query": "party venues"}}"#
        }
        ToolKind::ModifyData => {
            r#"{"thought": "Turn ideas into a checklist", "input": {"data": {"items": ["cake", "balloons"]}}}"#
        }
        ToolKind::SaveOutput => {
            r#"{"thought": "Store the final plan", "input": {"label": "party-plan", "content": {"summary": "..."}}}"#
        }
    }
}

/// Simplifier 使用的提示
pub fn simplify_prompt(raw_task: &str) -> String {
    format!(
        "{}\nTask: {}\n\nRestate the task as one goal, list explicit constraints and the assumptions you make.\n\
         Reply with JSON: {{\"goal\": \"...\", \"constraints\": [\"...\"], \"assumptions\": [\"...\"]}}",
        PromptKind::Simplify.header(),
        raw_task.trim()
    )
}

/// Planner 第 index 个候选（从 1 开始）使用的提示
pub fn plan_prompt(intent: &Intent, index: usize, total: usize, tools: &[(ToolKind, String)]) -> String {
    let mut s = format!(
        "{}\nGoal: {}\nCandidate: {} of {}\n",
        PromptKind::Plan.header(),
        intent.goal,
        index,
        total
    );
    push_list(&mut s, "Constraints", &intent.constraints);
    push_list(&mut s, "Assumptions", &intent.assumptions);
    s.push_str("\nAvailable tools:\n");
    for (kind, description) in tools {
        s.push_str(&format!("- {kind}: {description}\n"));
    }
    s.push_str(&format!(
        "\nThe tool field must match this JSON Schema:\n```json\n{}\n```\n",
        tool_kind_schema_json()
    ));
    s.push_str(
        "\nDecompose the goal into subtasks forming a DAG. Every subtask needs id, description, tool, \
         dependencies, success_criteria and deliverable.\n\
         Reply with JSON: {\"subtasks\": [{\"id\": \"step-1\", \"description\": \"...\", \"tool\": \"generate_text\", \
         \"dependencies\": [], \"success_criteria\": \"...\", \"deliverable\": \"...\"}]}",
    );
    s
}

/// Replanner 使用的提示
pub fn replan_prompt(
    intent: &Intent,
    failed: &Subtask,
    failure_reason: &str,
    completed: &[String],
) -> String {
    let mut s = format!(
        "{}\nGoal: {}\nFailed subtask: {}\nDescription: {}\nTool: {}\nDeliverable: {}\nFailure: {}\n",
        PromptKind::Replan.header(),
        intent.goal,
        failed.id,
        failed.description,
        failed.tool,
        failed.deliverable,
        failure_reason
    );
    push_list(&mut s, "Completed subtasks", completed);
    s.push_str(
        "\nPropose recovery subtasks that produce the failed deliverable another way, or abandon.\n\
         Use local ids; dependencies may reference local ids or completed subtasks.\n\
         Reply with JSON: {\"strategy\": \"alternate\" | \"abandon\", \"subtasks\": [...]}",
    );
    s
}

/// 模型评审使用的提示
pub fn critique_prompt(subtask: &Subtask, tool: ToolKind, output: &Value) -> String {
    format!(
        "{}\nSubtask: {}\nTool: {}\nSuccess criteria: {}\nDeliverable: {}\nObservation: {}\n\n\
         Does the observation satisfy the success criteria?\n\
         Reply with JSON: {{\"passed\": true | false, \"reason\": \"...\"}}",
        PromptKind::Critique.header(),
        subtask.id,
        tool,
        subtask.success_criteria,
        subtask.deliverable,
        output
    )
}

fn push_list(s: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        s.push_str(&format!("{title}: none\n"));
    } else {
        s.push_str(&format!("{title}:\n"));
        for item in items {
            s.push_str(&format!("- {item}\n"));
        }
    }
}

/// 读取提示中 `<key>: <value>` 行的值（mock 与测试使用）
pub fn field<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
    let prefix = format!("{key}: ");
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
}
