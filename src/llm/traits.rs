//! 推理能力抽象
//!
//! 引擎只把模型当作纯能力：generate(prompt, constraints) -> 文本；不假设任何厂商语义。
//! 所有调用经 generate_with_timeout 施加单次超时，超时即 ModelError::Timeout。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 期望的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

/// 单次生成的约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConstraints {
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

impl GenerationConstraints {
    pub fn text(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            response_format: ResponseFormat::Text,
        }
    }

    pub fn json(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            response_format: ResponseFormat::Json,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// 模型调用失败：超时、限流、输出格式错误、后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model call timed out after {0}ms")]
    Timeout(u64),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Malformed model output: {0}")]
    Malformed(String),

    #[error("Model backend error: {0}")]
    Backend(String),
}

/// 推理能力 trait
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, ModelError>;

    /// 模型标识（日志用）
    fn name(&self) -> &str {
        "reasoning"
    }
}

/// 带超时的单次调用
pub async fn generate_with_timeout(
    model: &dyn ReasoningModel,
    prompt: &str,
    constraints: &GenerationConstraints,
    limit: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(limit, model.generate(prompt, constraints)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(model = model.name(), timeout_ms = limit.as_millis() as u64, "model call timed out");
            Err(ModelError::Timeout(limit.as_millis() as u64))
        }
    }
}
