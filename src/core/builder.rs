//! 引擎构建器：统一的 Engine 初始化逻辑
//!
//! 推理模型、工具注册表、计划评分器都可替换；未指定时使用内置 Mock 实现。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, CritiqueMode};
use crate::core::orchestrator::Engine;
use crate::llm::{GenerationConstraints, MockReasoning, ReasoningModel};
use crate::memory::Ledger;
use crate::react::{
    Critic, EngineEvent, HeuristicScorer, InputLimits, IntentSimplifier, PlanScorer, Planner,
    Replanner, SubtaskExecutor,
};
use crate::tools::{mock_registry, ToolExecutor, ToolRegistry};

/// 引擎构建器
pub struct EngineBuilder {
    config: AppConfig,
    model: Option<Arc<dyn ReasoningModel>>,
    registry: Option<ToolRegistry>,
    scorer: Option<Arc<dyn PlanScorer>>,
    ledger: Option<Arc<Ledger>>,
    event_tx: Option<UnboundedSender<EngineEvent>>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            model: None,
            registry: None,
            scorer: None,
            ledger: None,
            event_tx: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ReasoningModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn PlanScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// 共享已有 ledger（多个引擎实例写同一份记录）
    pub fn with_ledger(mut self, ledger: Arc<Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// 过程事件发送端
    pub fn with_event_tx(mut self, tx: UnboundedSender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 推理调用的生成约束（结构化输出）
    pub fn build_constraints(&self) -> GenerationConstraints {
        GenerationConstraints::json(self.config.llm.max_tokens, self.config.llm.temperature)
    }

    /// 按配置构建 Critic
    pub fn build_critic(&self, model: Arc<dyn ReasoningModel>) -> Critic {
        match self.config.engine.critique {
            CritiqueMode::Rule => Critic::rule(),
            CritiqueMode::Model => Critic::model_based(
                model,
                self.build_constraints().with_temperature(0.0),
                self.request_timeout(),
            ),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.request_timeout_secs)
    }

    pub fn build(self) -> Engine {
        let model: Arc<dyn ReasoningModel> = self
            .model
            .clone()
            .unwrap_or_else(|| Arc::new(MockReasoning::new()));
        let registry = self.registry.clone().unwrap_or_else(mock_registry);
        let scorer: Arc<dyn PlanScorer> = self
            .scorer
            .clone()
            .unwrap_or_else(|| Arc::new(HeuristicScorer));
        let constraints = self.build_constraints();
        let timeout = self.request_timeout();
        let engine = &self.config.engine;

        let tool_descriptions = registry.tool_descriptions();
        let tools = Arc::new(ToolExecutor::new(registry, self.config.tools.tool_timeout_secs));
        let critic = Arc::new(self.build_critic(model.clone()));
        tracing::debug!(
            model = model.name(),
            scorer = scorer.name(),
            tools = tool_descriptions.len(),
            critique = ?engine.critique,
            "engine components built"
        );

        Engine {
            simplifier: IntentSimplifier::new(
                model.clone(),
                constraints.clone(),
                timeout,
                InputLimits {
                    min_chars: engine.min_task_chars,
                    min_words: engine.min_task_words,
                },
            ),
            planner: Planner::new(model.clone(), scorer, constraints.clone(), timeout)
                .with_tools(tool_descriptions),
            executor: SubtaskExecutor::new(
                model.clone(),
                tools,
                critic,
                constraints.clone(),
                timeout,
                engine.max_attempts,
                self.config.tools.clone(),
            ),
            replanner: Replanner::new(model, constraints, timeout),
            ledger: self.ledger.unwrap_or_else(|| Arc::new(Ledger::new())),
            event_tx: self.event_tx,
            config: self.config,
        }
    }
}

/// 便捷函数：从配置文件创建 EngineBuilder（加载失败时使用默认配置）
pub fn create_engine_builder(config_path: Option<PathBuf>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    EngineBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_engine_config() {
        let mut config = AppConfig::default();
        config.engine.max_concurrent_subtasks = 2;
        config.engine.critique = CritiqueMode::Model;
        let builder = EngineBuilder::new(config);
        assert_eq!(builder.build_critic(Arc::new(MockReasoning::new())).mode(), CritiqueMode::Model);
        let engine = builder.build();
        assert_eq!(engine.task_scheduler().max_concurrent(), 2);
        assert_eq!(engine.config().engine.critique, CritiqueMode::Model);
    }
}
