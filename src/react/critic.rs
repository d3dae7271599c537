//! Critic：判断一次工具输出是否满足子任务的成功标准
//!
//! 默认按工具输出形状做确定性检查；配置为 model 时交给推理模型判断（输出 {"passed", "reason"}）。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::CritiqueMode;
use crate::llm::{generate_with_timeout, parse_json, GenerationConstraints, ModelError, ReasoningModel};
use crate::plan::{Critique, Subtask};
use crate::react::rewriter::critique_prompt;
use crate::tools::ToolKind;

#[derive(Debug, Deserialize)]
struct Verdict {
    passed: bool,
    #[serde(default)]
    reason: String,
}

pub struct Critic {
    mode: CritiqueMode,
    model: Option<Arc<dyn ReasoningModel>>,
    constraints: GenerationConstraints,
    timeout: Duration,
}

impl Critic {
    /// 仅做规则检查
    pub fn rule() -> Self {
        Self {
            mode: CritiqueMode::Rule,
            model: None,
            constraints: GenerationConstraints::json(256, 0.0),
            timeout: Duration::from_secs(30),
        }
    }

    /// 由模型评审；模型未通过规则前置检查时不会被调用
    pub fn model_based(
        model: Arc<dyn ReasoningModel>,
        constraints: GenerationConstraints,
        timeout: Duration,
    ) -> Self {
        Self {
            mode: CritiqueMode::Model,
            model: Some(model),
            constraints,
            timeout,
        }
    }

    pub fn mode(&self) -> CritiqueMode {
        self.mode
    }

    pub async fn critique(
        &self,
        subtask: &Subtask,
        tool: ToolKind,
        output: &Value,
    ) -> Result<Critique, ModelError> {
        let rule = rule_check(tool, output);
        if !rule.passed {
            return Ok(rule);
        }
        match (&self.mode, &self.model) {
            (CritiqueMode::Model, Some(model)) => {
                let prompt = critique_prompt(subtask, tool, output);
                let out =
                    generate_with_timeout(model.as_ref(), &prompt, &self.constraints, self.timeout)
                        .await?;
                let verdict: Verdict = parse_json(&out)?;
                let reason = if verdict.reason.trim().is_empty() {
                    "no reason given".to_string()
                } else {
                    verdict.reason
                };
                Ok(Critique {
                    passed: verdict.passed,
                    reason,
                })
            }
            _ => Ok(rule),
        }
    }
}

fn non_empty_str(output: &Value, key: &str) -> bool {
    output
        .get(key)
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.trim().is_empty())
}

/// 按工具输出形状检查
pub fn rule_check(tool: ToolKind, output: &Value) -> Critique {
    match tool {
        ToolKind::GenerateText if non_empty_str(output, "text") => Critique::pass("text generated"),
        ToolKind::GenerateText => Critique::fail("generated text is empty"),
        // 空结果也是有效结论，只要求返回结果列表
        ToolKind::SearchInFiles => match output.get("results").and_then(|v| v.as_array()) {
            Some(r) if r.is_empty() => Critique::pass("search completed with no matches"),
            Some(r) => Critique::pass(format!("{} results found", r.len())),
            None => Critique::fail("search output has no results list"),
        },
        ToolKind::ModifyData if non_empty_str(output, "summary") => Critique::pass("data modified"),
        ToolKind::ModifyData => Critique::fail("modification produced no summary"),
        ToolKind::SaveOutput => {
            let stored = output.get("stored").and_then(|v| v.as_bool()).unwrap_or(false);
            if stored && non_empty_str(output, "key") {
                Critique::pass("output stored")
            } else {
                Critique::fail("output was not stored under a key")
            }
        }
    }
}
