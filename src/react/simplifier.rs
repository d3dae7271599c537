//! Intent Simplifier：把原始任务文本归一为结构化 Intent
//!
//! 过短或为空的输入直接返回 Validation 错误（不重试）；模型调用失败或输出不合法时
//! 退回确定性启发式（按 " and " 拆分多意图，识别预算、日期、数量等约束）。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::EngineError;
use crate::llm::{generate_with_timeout, parse_json, GenerationConstraints, ReasoningModel};
use crate::plan::Intent;
use crate::react::rewriter::simplify_prompt;

const BUDGET_MARKERS: &[&str] = &["$", "€", "£", "budget", "cost", "price", "cheap", "afford"];
const DATE_MARKERS: &[&str] = &[
    "today", "tomorrow", "tonight", "weekend", "next week", "next month", "deadline", "by ",
    "before ", "until ", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday", "january", "february", "march", "april", "may ", "june", "july", "august",
    "september", "october", "november", "december",
];
const LIMIT_MARKERS: &[&str] = &["at most", "at least", "no more than", "under ", "within ", "only ", "must "];

/// 简化器的长度下限
#[derive(Debug, Clone, Copy)]
pub struct InputLimits {
    pub min_chars: usize,
    pub min_words: usize,
}

pub struct IntentSimplifier {
    model: Arc<dyn ReasoningModel>,
    constraints: GenerationConstraints,
    timeout: Duration,
    limits: InputLimits,
}

#[derive(Debug, Deserialize)]
struct IntentDraft {
    #[serde(default)]
    goal: String,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    assumptions: Vec<String>,
}

impl IntentSimplifier {
    pub fn new(
        model: Arc<dyn ReasoningModel>,
        constraints: GenerationConstraints,
        timeout: Duration,
        limits: InputLimits,
    ) -> Self {
        Self {
            model,
            constraints,
            timeout,
            limits,
        }
    }

    /// 仅做输入校验；返回 trim 后的文本
    pub fn validate<'a>(&self, raw_task: &'a str) -> Result<&'a str, EngineError> {
        let text = raw_task.trim();
        if text.is_empty() {
            return Err(EngineError::Validation("task description is empty".to_string()));
        }
        let chars = text.chars().count();
        if chars < self.limits.min_chars {
            return Err(EngineError::Validation(format!(
                "task description too short: {chars} chars, need at least {}",
                self.limits.min_chars
            )));
        }
        let words = text.split_whitespace().count();
        if words < self.limits.min_words {
            return Err(EngineError::Validation(format!(
                "task description too short: {words} words, need at least {}",
                self.limits.min_words
            )));
        }
        Ok(text)
    }

    pub async fn simplify(&self, raw_task: &str) -> Result<Intent, EngineError> {
        let text = self.validate(raw_task)?;
        let prompt = simplify_prompt(text);
        let reply =
            generate_with_timeout(self.model.as_ref(), &prompt, &self.constraints, self.timeout).await;

        let drafted = reply.and_then(|out| parse_json::<IntentDraft>(&out));
        match drafted {
            Ok(draft) if !draft.goal.trim().is_empty() => Ok(Intent {
                goal: draft.goal.trim().to_string(),
                constraints: clean(draft.constraints),
                assumptions: clean(draft.assumptions),
            }),
            Ok(_) => {
                tracing::warn!("simplification returned an empty goal, using heuristic");
                Ok(heuristic_intent(text))
            }
            Err(e) => {
                tracing::warn!(error = %e, "simplification degraded to heuristic");
                Ok(heuristic_intent(text))
            }
        }
    }
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 确定性启发式简化
pub fn heuristic_intent(text: &str) -> Intent {
    let text = text.trim();
    let parts: Vec<&str> = text
        .split(" and ")
        .map(|p| p.trim().trim_end_matches('.').trim())
        .filter(|p| !p.is_empty())
        .collect();
    let goal = if parts.len() > 1 {
        parts.join("; ")
    } else {
        text.trim_end_matches('.').trim().to_string()
    };

    let mut constraints = Vec::new();
    for clause in text
        .split([',', ';'])
        .flat_map(|c| c.split(" and "))
        .map(|c| c.trim().trim_end_matches('.').trim())
        .filter(|c| !c.is_empty())
    {
        let lower = format!("{} ", clause.to_lowercase());
        let label = if BUDGET_MARKERS.iter().any(|m| lower.contains(m)) {
            Some("Budget")
        } else if DATE_MARKERS.iter().any(|m| lower.contains(m)) {
            Some("Timing")
        } else if LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
            Some("Limit")
        } else if clause.chars().any(|c| c.is_ascii_digit()) {
            Some("Quantity")
        } else {
            None
        };
        if let Some(label) = label {
            let entry = format!("{label}: {clause}");
            if !constraints.contains(&entry) {
                constraints.push(entry);
            }
        }
    }

    let mut assumptions = vec![
        "Work is carried out with the available tools only".to_string(),
        "Unspecified details may use sensible defaults".to_string(),
    ];
    if parts.len() > 1 {
        assumptions.push(format!("The request contains {} intents handled in order", parts.len()));
    }

    Intent {
        goal,
        constraints,
        assumptions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockReasoning, ModelError};
    use crate::react::PromptKind;

    fn simplifier(model: MockReasoning) -> IntentSimplifier {
        IntentSimplifier::new(
            Arc::new(model),
            GenerationConstraints::json(256, 0.0),
            Duration::from_secs(1),
            InputLimits {
                min_chars: 8,
                min_words: 2,
            },
        )
    }

    #[test]
    fn test_heuristic_detects_constraints() {
        let intent = heuristic_intent(
            "Plan a birthday party for 12 guests, budget under $200 and send invites by Friday.",
        );
        assert_eq!(
            intent.goal,
            "Plan a birthday party for 12 guests, budget under $200; send invites by Friday"
        );
        assert!(intent.constraints.contains(&"Budget: budget under $200".to_string()));
        assert!(intent.constraints.contains(&"Timing: send invites by Friday".to_string()));
        assert!(intent.constraints.contains(&"Quantity: Plan a birthday party for 12 guests".to_string()));
        assert_eq!(intent.assumptions.len(), 3);
    }

    #[test]
    fn test_heuristic_single_intent() {
        let intent = heuristic_intent("Write a short poem about autumn.");
        assert_eq!(intent.goal, "Write a short poem about autumn");
        assert!(intent.constraints.is_empty());
        assert_eq!(intent.assumptions.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_short_input() {
        let s = simplifier(MockReasoning::new());
        assert!(matches!(s.simplify("   ").await, Err(EngineError::Validation(_))));
        assert!(matches!(s.simplify("Hi").await, Err(EngineError::Validation(_))));
        assert!(matches!(s.simplify("Summarize").await, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let model = MockReasoning::new()
            .failing(PromptKind::Simplify, ModelError::Backend("down".into()));
        let intent = simplifier(model).simplify("Plan a birthday party for my friend").await.unwrap();
        assert_eq!(intent.goal, "Plan a birthday party for my friend");
    }

    #[tokio::test]
    async fn test_model_output_is_used() {
        let model = MockReasoning::new().with_response(
            PromptKind::Simplify,
            r#"{"goal": "Organize a party", "constraints": [" $100 ", ""], "assumptions": ["indoor"]}"#,
        );
        let intent = simplifier(model).simplify("Plan a birthday party for my friend").await.unwrap();
        assert_eq!(intent.goal, "Organize a party");
        assert_eq!(intent.constraints, vec!["$100".to_string()]);
        assert_eq!(intent.assumptions, vec!["indoor".to_string()]);
    }
}
