//! 工具注册表
//!
//! 工具能力是封闭集合（ToolKind）；每个变体由一个实现 Tool trait 的对象承载，
//! ToolRegistry 按 ToolKind 注册与查找，ToolExecutor 在调用时加超时并输出审计日志。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 工具能力（封闭集合）；新增工具即新增变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    GenerateText,
    SearchInFiles,
    ModifyData,
    SaveOutput,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::GenerateText,
        ToolKind::SearchInFiles,
        ToolKind::ModifyData,
        ToolKind::SaveOutput,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::GenerateText => "generate_text",
            ToolKind::SearchInFiles => "search_in_files",
            ToolKind::ModifyData => "modify_data",
            ToolKind::SaveOutput => "save_output",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| ToolError::new(ToolErrorKind::Unavailable, format!("Unknown tool: {s}")))
    }
}

/// 工具失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidInput,
    Unavailable,
    Timeout,
    Failed,
}

/// 工具失败：(kind, message)
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Failed, message)
    }
}

/// 工具 trait：能力、描述（供 prompt 使用）、输入 schema、异步执行（输入输出均为 JSON）
///
/// 调用方可对同一输入安全重试。
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &str;

    /// 输入 JSON Schema；默认使用该能力的标准输入结构
    fn input_schema(&self) -> Value {
        crate::tools::schema::input_schema_for(self.kind())
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

/// 工具注册表：按 ToolKind 存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同一能力重复注册时后者覆盖前者
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.kind(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.kind(), tool);
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ToolKind) -> bool {
        self.tools.contains_key(&kind)
    }

    pub async fn execute(&self, kind: ToolKind, input: Value) -> Result<Value, ToolError> {
        let tool = self.tools.get(&kind).ok_or_else(|| {
            ToolError::new(ToolErrorKind::Unavailable, format!("No tool registered for {kind}"))
        })?;
        tool.execute(input).await
    }

    /// 已注册能力（排序后返回，输出稳定）
    pub fn kinds(&self) -> Vec<ToolKind> {
        let mut kinds: Vec<ToolKind> = self.tools.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// 返回 (kind, description) 列表，用于 prompt 中的工具说明
    pub fn tool_descriptions(&self) -> Vec<(ToolKind, String)> {
        self.kinds()
            .into_iter()
            .filter_map(|k| self.tools.get(&k).map(|t| (k, t.description().to_string())))
            .collect()
    }

    /// 动态生成工具 schema JSON（与实际注册的工具一致）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .kinds()
            .into_iter()
            .filter_map(|k| self.tools.get(&k).map(|t| (k, t)))
            .map(|(kind, tool)| {
                serde_json::json!({
                    "name": kind.as_str(),
                    "description": tool.description(),
                    "parameters": tool.input_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockTool;

    #[test]
    fn test_tool_kind_round_trip_names() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.as_str().parse::<ToolKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                Value::String(kind.as_str().to_string())
            );
        }
        assert!("shell".parse::<ToolKind>().is_err());
    }

    #[tokio::test]
    async fn test_registry_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute(ToolKind::SaveOutput, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Unavailable);
    }

    #[test]
    fn test_schema_json_lists_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool::new(ToolKind::GenerateText));
        let json = registry.to_schema_json();
        assert!(json.contains("generate_text"));
        assert!(!json.contains("save_output"));
        assert_eq!(registry.kinds(), vec![ToolKind::GenerateText]);
    }
}
