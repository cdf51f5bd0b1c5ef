//! TaskContext - handler に渡す実行コンテキスト

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::{QueueName, TaskId, TaskType};

/// Per-attempt view of the task being processed.
///
/// The cancellation token fires when the server gives up on the attempt
/// (shutdown timeout). Handlers doing long work should watch it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    task_type: TaskType,
    queue: QueueName,
    retry_count: u32,
    max_retry: u32,
    deadline: DateTime<Utc>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        queue: QueueName,
        retry_count: u32,
        max_retry: u32,
        deadline: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            task_type,
            queue,
            retry_count,
            max_retry,
            deadline,
            cancel,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Failures recorded before this attempt (0 on the first attempt).
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// No retry budget left: a failure now archives the task.
    pub fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retry
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the attempt is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
