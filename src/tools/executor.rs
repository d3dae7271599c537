//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(kind, input) 在超时内调用 registry.execute，
//! 超时转为 ToolError(Timeout)；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::tools::{Tool, ToolError, ToolErrorKind, ToolKind, ToolRegistry};

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行指定工具；超时返回 ToolError(Timeout)，工具错误原样返回；输出 JSON 审计日志
    pub async fn execute(&self, kind: ToolKind, input: Value) -> Result<Value, ToolError> {
        let start = Instant::now();
        let input_preview = input_preview(&input);
        let result = timeout(self.timeout, self.registry.execute(kind, input)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": kind.as_str(),
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": duration_ms,
            "input_preview": input_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(r) => r,
            Err(_) => Err(ToolError::new(
                ToolErrorKind::Timeout,
                format!("{kind} timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    pub fn get_tool(&self, kind: ToolKind) -> Option<std::sync::Arc<dyn Tool>> {
        self.registry.get(kind)
    }

    pub fn has_tool(&self, kind: ToolKind) -> bool {
        self.registry.contains(kind)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn input_preview(input: &Value) -> String {
    let s = input.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn kind(&self) -> ToolKind {
            ToolKind::SearchInFiles
        }

        fn description(&self) -> &str {
            "never returns in time"
        }

        async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let executor = ToolExecutor::with_timeout(registry, Duration::from_millis(20));
        let err = executor
            .execute(ToolKind::SearchInFiles, serde_json::json!({"query": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
    }

    #[test]
    fn test_input_preview_truncates() {
        let long = serde_json::json!({ "text": "x".repeat(500) });
        let preview = input_preview(&long);
        assert!(preview.ends_with("..."));
        assert!(preview.chars().count() <= 203);
    }
}
