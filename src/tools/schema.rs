//! 工具输入 JSON Schema 生成（schemars）
//!
//! 每种工具能力有一个标准输入结构，Schema 会拼入 ACT prompt，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolKind;

/// generate_text 输入
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GenerateTextInput {
    /// 生成指令（通常是改写后的 prompt）
    pub prompt: String,
}

/// search_in_files 输入
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchInFilesInput {
    pub query: String,
}

/// modify_data 输入
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ModifyDataInput {
    /// 待变换的数据（任意 JSON）
    pub data: Value,
}

/// save_output 输入
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SaveOutputInput {
    /// 存储键前缀
    pub label: String,
    pub content: Value,
}

/// 返回指定能力的输入 Schema（JSON 值）
pub fn input_schema_for(kind: ToolKind) -> Value {
    let schema = match kind {
        ToolKind::GenerateText => schema_for!(GenerateTextInput),
        ToolKind::SearchInFiles => schema_for!(SearchInFilesInput),
        ToolKind::ModifyData => schema_for!(ModifyDataInput),
        ToolKind::SaveOutput => schema_for!(SaveOutputInput),
    };
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// 工具名的 JSON Schema 字符串（枚举所有能力），可拼入规划 prompt
pub fn tool_kind_schema_json() -> String {
    let schema = schema_for!(ToolKind);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_schema_has_required_fields() {
        let schema = input_schema_for(ToolKind::SaveOutput);
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "label"));
        assert!(schema["properties"]["content"].is_object() || schema["properties"]["content"].is_boolean());
    }

    #[test]
    fn test_tool_kind_schema_lists_variants() {
        let json = tool_kind_schema_json();
        for kind in ToolKind::ALL {
            assert!(json.contains(kind.as_str()));
        }
    }
}
