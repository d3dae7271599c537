//! 子任务工作记忆：已尝试的工具与失败原因
//!
//! 在单个子任务的尝试之间有效，拼入重试时的提示（What has been tried / Failures），减少重复犯错。

use crate::tools::ToolKind;

#[derive(Clone, Debug, Default)]
pub struct WorkingMemory {
    pub attempts: Vec<String>,
    pub failures: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次尝试，格式 "tool -> outcome"
    pub fn add_attempt(&mut self, tool: ToolKind, outcome: impl AsRef<str>) {
        self.attempts.push(format!("{} -> {}", tool, outcome.as_ref()));
    }

    pub fn add_failure(&mut self, failure: impl Into<String>) {
        self.failures.push(failure.into());
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.failures.is_empty()
    }

    /// 已用过的工具（去重，保持首次出现顺序）
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self
            .attempts
            .iter()
            .filter_map(|a| a.split(" -> ").next().map(|s| s.trim().to_string()))
        {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// 供提示使用的片段；无记录时为空串
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        if !self.attempts.is_empty() {
            s.push_str("## What has been tried\n");
            for a in &self.attempts {
                s.push_str(&format!("- {}\n", a));
            }
            s.push('\n');
        }
        if !self.failures.is_empty() {
            s.push_str("## Failures\n");
            for f in &self.failures {
                s.push_str(&format!("- {}\n", f));
            }
            s.push('\n');
        }
        s
    }
}
