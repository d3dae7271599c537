//! 从模型输出中提取 JSON
//!
//! 兼容 ```json ... ``` 代码块、普通 ``` 代码块与裸 JSON 对象。

use serde::de::DeserializeOwned;

use crate::llm::ModelError;

/// 提取 JSON 片段；找不到对象时返回 None
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let block = rest[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析为目标结构；失败返回 ModelError::Malformed（附原始片段）
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, ModelError> {
    let block = extract_json_block(output)
        .ok_or_else(|| ModelError::Malformed(format!("no JSON object in: {}", preview(output))))?;
    serde_json::from_str(block).map_err(|e| ModelError::Malformed(format!("{}: {}", e, preview(block))))
}

fn preview(s: &str) -> String {
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        passed: bool,
    }

    #[test]
    fn test_extract_fenced_json() {
        let out = "Sure:\n```json\n{\"passed\": true}\n```\nDone";
        assert_eq!(extract_json_block(out), Some("{\"passed\": true}"));
        assert!(parse_json::<Verdict>(out).unwrap().passed);
    }

    #[test]
    fn test_extract_bare_json() {
        let out = "verdict {\"passed\": false} end";
        assert!(!parse_json::<Verdict>(out).unwrap().passed);
    }

    #[test]
    fn test_plain_text_is_malformed() {
        assert!(extract_json_block("just words").is_none());
        assert!(matches!(parse_json::<Verdict>("just words"), Err(ModelError::Malformed(_))));
        assert!(matches!(parse_json::<Verdict>("{\"other\": 1}"), Err(ModelError::Malformed(_))));
    }
}
