//! 任务调度：子任务并发许可与协作式取消
//!
//! 同一波次的就绪子任务并发执行，使用 Semaphore 限制同时运行的子任务数。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::EngineError;

/// 任务调度器（每个任务一个，限制该任务同时运行的子任务数）
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    subtask_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_subtasks: usize) -> Self {
        let max_concurrent = max_concurrent_subtasks.max(1);
        Self {
            subtask_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取子任务执行许可；取消时立即返回 Cancelled
    pub async fn acquire_subtask(
        &self,
        token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, EngineError> {
        tokio::select! {
            permit = self.subtask_semaphore.clone().acquire_owned() => {
                permit.map_err(|_| EngineError::Invariant("subtask semaphore closed".to_string()))
            }
            _ = token.cancelled() => Err(EngineError::Cancelled("cancelled while waiting for a permit".to_string())),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available(&self) -> usize {
        self.subtask_semaphore.available_permits()
    }

    /// 检查是否应取消
    pub fn is_cancelled(token: &CancellationToken) -> bool {
        token.is_cancelled()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
