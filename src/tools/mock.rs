//! Mock 工具（用于测试与演示，无外部依赖）
//!
//! 四种能力各有确定性输出；可配置为总是失败或前 N 次失败，便于覆盖备用工具与重试路径。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolError, ToolKind, ToolRegistry};

/// 失败行为
#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    FailAlways(String),
    FailTimes(u32),
}

/// Mock 工具：按能力返回固定结构的输出
pub struct MockTool {
    kind: ToolKind,
    behavior: Behavior,
    calls: AtomicU32,
    storage: Mutex<HashMap<String, Value>>,
}

impl MockTool {
    pub fn new(kind: ToolKind) -> Self {
        Self {
            kind,
            behavior: Behavior::Succeed,
            calls: AtomicU32::new(0),
            storage: Mutex::new(HashMap::new()),
        }
    }

    /// 每次调用都返回 ToolError(Failed)
    pub fn failing(kind: ToolKind, message: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::FailAlways(message.into()),
            ..Self::new(kind)
        }
    }

    /// 前 n 次调用失败，之后成功
    pub fn failing_times(kind: ToolKind, n: u32) -> Self {
        Self {
            behavior: Behavior::FailTimes(n),
            ..Self::new(kind)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn produce(&self, input: &Value) -> Result<Value, ToolError> {
        match self.kind {
            ToolKind::GenerateText => {
                let prompt = input
                    .get("prompt")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("No prompt provided.");
                let first_line = prompt.lines().next().unwrap_or(prompt);
                Ok(json!({ "text": format!("Generated: {first_line}") }))
            }
            ToolKind::SearchInFiles => {
                let query = input.get("query").and_then(|v| v.as_str()).unwrap_or("");
                let topic: String = query.chars().take(60).collect();
                Ok(json!({
                    "query": topic,
                    "results": [
                        { "source": "notes/overview.md", "snippet": format!("Overview related to {topic}") },
                        { "source": "notes/details.md", "snippet": "Supporting details" },
                    ]
                }))
            }
            ToolKind::ModifyData => {
                let data = input.get("data").cloned().unwrap_or(Value::Null);
                let keys = data.as_object().map(|m| m.len()).unwrap_or(0);
                Ok(json!({
                    "original": data,
                    "summary": format!("Modified data with {keys} top-level keys."),
                }))
            }
            ToolKind::SaveOutput => {
                let label = input
                    .get("label")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("output");
                let mut storage = self
                    .storage
                    .lock()
                    .map_err(|_| ToolError::failed("storage lock poisoned"))?;
                let next = storage
                    .keys()
                    .filter(|k| k.starts_with(&format!("{label}#")))
                    .count()
                    + 1;
                let key = format!("{label}#{next}");
                storage.insert(key.clone(), input.get("content").cloned().unwrap_or(Value::Null));
                Ok(json!({ "key": key, "stored": true }))
            }
        }
    }
}

#[async_trait]
impl Tool for MockTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn description(&self) -> &str {
        match self.kind {
            ToolKind::GenerateText => "Generate text from a prompt. Input: {\"prompt\": \"...\"}",
            ToolKind::SearchInFiles => "Search local notes. Input: {\"query\": \"...\"}",
            ToolKind::ModifyData => "Transform structured data. Input: {\"data\": {...}}",
            ToolKind::SaveOutput => {
                "Persist content under a key. Input: {\"label\": \"...\", \"content\": {...}}"
            }
        }
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            Behavior::FailAlways(msg) => Err(ToolError::failed(msg.clone())),
            Behavior::FailTimes(n) if call <= *n => {
                Err(ToolError::failed(format!("transient failure {call}/{n}")))
            }
            _ => self.produce(&input),
        }
    }
}

/// 注册四种能力的确定性 Mock 工具
pub fn mock_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in ToolKind::ALL {
        registry.register(MockTool::new(kind));
    }
    registry
}
