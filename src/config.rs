//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PLANCRAFT__*` 覆盖（双下划线表示嵌套，如 `PLANCRAFT__ENGINE__MAX_ATTEMPTS=5`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tools::ToolKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// RunResult.memory 中保留的 ledger 摘录条数
    #[serde(default = "default_memory_excerpts")]
    pub memory_excerpts: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            memory_excerpts: default_memory_excerpts(),
        }
    }
}

fn default_app_name() -> String {
    "plancraft".to_string()
}

fn default_memory_excerpts() -> usize {
    20
}

/// [llm] 段：生成约束与单次调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 基础温度；第 i 个候选计划使用 temperature + 0.1 * i
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// 子任务失败后其下游的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipPolicy {
    /// 传递跳过所有下游
    #[default]
    Cascade,
    /// 只跳过直接下游；SKIPPED 的依赖视为已满足
    OneLevel,
}

/// 评审方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueMode {
    /// 按工具输出形状做确定性检查
    #[default]
    Rule,
    /// 交给推理模型判断
    Model,
}

/// [engine] 段：规划、执行与重规划参数
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_candidate_plans")]
    pub candidate_plans: usize,
    /// 每个子任务的尝试上限
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_task_chars")]
    pub min_task_chars: usize,
    #[serde(default = "default_min_task_words")]
    pub min_task_words: usize,
    /// 每个任务最多重规划次数
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    #[serde(default = "default_max_concurrent_subtasks")]
    pub max_concurrent_subtasks: usize,
    #[serde(default)]
    pub skip_policy: SkipPolicy,
    #[serde(default)]
    pub critique: CritiqueMode,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            candidate_plans: default_candidate_plans(),
            max_attempts: default_max_attempts(),
            min_task_chars: default_min_task_chars(),
            min_task_words: default_min_task_words(),
            max_replans: default_max_replans(),
            max_concurrent_subtasks: default_max_concurrent_subtasks(),
            skip_policy: SkipPolicy::default(),
            critique: CritiqueMode::default(),
        }
    }
}

fn default_candidate_plans() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_task_chars() -> usize {
    8
}

fn default_min_task_words() -> usize {
    2
}

fn default_max_replans() -> u32 {
    3
}

fn default_max_concurrent_subtasks() -> usize {
    4
}

/// [tools] 段：工具超时与默认备用顺序
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 子任务未声明 fallbacks 时，按主工具查找的默认备用顺序
    #[serde(default = "default_fallbacks")]
    pub fallbacks: Vec<FallbackRule>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            fallbacks: default_fallbacks(),
        }
    }
}

impl ToolsSection {
    /// 主工具的默认备用列表
    pub fn fallbacks_for(&self, primary: ToolKind) -> Vec<ToolKind> {
        self.fallbacks
            .iter()
            .find(|r| r.primary == primary)
            .map(|r| r.fallbacks.clone())
            .unwrap_or_default()
    }
}

/// [[tools.fallbacks]]：primary 失败后依次尝试 fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub primary: ToolKind,
    pub fallbacks: Vec<ToolKind>,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_fallbacks() -> Vec<FallbackRule> {
    vec![FallbackRule {
        primary: ToolKind::SearchInFiles,
        fallbacks: vec![ToolKind::GenerateText],
    }]
}

/// 从 config 目录加载配置，环境变量 PLANCRAFT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PLANCRAFT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PLANCRAFT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.candidate_plans, 3);
        assert_eq!(cfg.engine.max_attempts, 3);
        assert_eq!(cfg.engine.skip_policy, SkipPolicy::Cascade);
        assert_eq!(cfg.engine.critique, CritiqueMode::Rule);
        assert_eq!(
            cfg.tools.fallbacks_for(ToolKind::SearchInFiles),
            vec![ToolKind::GenerateText]
        );
        assert!(cfg.tools.fallbacks_for(ToolKind::SaveOutput).is_empty());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
max_attempts = 5
skip_policy = "one_level"
critique = "model"

[llm]
request_timeout_secs = 7

[[tools.fallbacks]]
primary = "modify_data"
fallbacks = ["generate_text"]
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engine.max_attempts, 5);
        assert_eq!(cfg.engine.skip_policy, SkipPolicy::OneLevel);
        assert_eq!(cfg.engine.critique, CritiqueMode::Model);
        assert_eq!(cfg.engine.candidate_plans, 3);
        assert_eq!(cfg.llm.request_timeout_secs, 7);
        assert_eq!(
            cfg.tools.fallbacks_for(ToolKind::ModifyData),
            vec![ToolKind::GenerateText]
        );
    }
}
