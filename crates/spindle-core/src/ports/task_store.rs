//! TaskStore port - 状態の正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - envelope と状態（pending / scheduled / active / retry / archived）
//! - lease（active なタスクの排他的な所有権）
//!
//! # 設計原則
//! - 状態遷移はすべて store の中でアトミックに行う
//! - lease の権威はここにある（ack / retry / archive は LeaseId を提示する）
//! - client と scheduler は追加するだけで、既存タスクは変更しない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{LeaseId, QueueName, TaskEnvelope, TaskId, TaskInfo, TaskState};
use crate::error::SpindleResult;

/// Exclusive claim on an active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful `dequeue`.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub envelope: TaskEnvelope,
    pub lease: Lease,
    /// Failures recorded before this attempt.
    pub retry_count: u32,
}

/// Per-queue counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub retry: usize,
    pub archived: usize,
}

impl QueueStats {
    pub fn count(&self, state: TaskState) -> usize {
        match state {
            TaskState::Pending => self.pending,
            TaskState::Scheduled => self.scheduled,
            TaskState::Active => self.active,
            TaskState::Retry => self.retry,
            TaskState::Archived => self.archived,
        }
    }

    pub(crate) fn bump(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Scheduled => self.scheduled += 1,
            TaskState::Active => self.active += 1,
            TaskState::Retry => self.retry += 1,
            TaskState::Archived => self.archived += 1,
        }
    }
}

/// How many archived tasks a store keeps per queue, and for how long.
///
/// Trimming happens whenever a task is archived: entries older than `max_age`
/// go first, then the oldest until at most `max_tasks` remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveRetention {
    pub max_tasks: usize,
    pub max_age: Duration,
}

impl Default for ArchiveRetention {
    fn default() -> Self {
        Self {
            max_tasks: 10_000,
            max_age: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }
}

impl ArchiveRetention {
    /// Archived entries strictly before this instant are dropped.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Store adapter.
///
/// `dequeue` returning `Ok(None)` is the "no task available" signal, not an error.
/// Backend outages surface as `SpindleError::StoreUnavailable`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert as pending when `process_at <= now`, scheduled otherwise.
    async fn enqueue(
        &self,
        envelope: TaskEnvelope,
        process_at: DateTime<Utc>,
    ) -> SpindleResult<TaskInfo>;

    /// Claim one pending task from the first non-empty queue in `queues` order.
    async fn dequeue(
        &self,
        queues: &[QueueName],
        lease_for: Duration,
    ) -> SpindleResult<Option<ClaimedTask>>;

    /// Terminal success: the task is removed.
    async fn ack(&self, id: TaskId, lease: LeaseId) -> SpindleResult<()>;

    /// Active -> Retry with `process_at = now + backoff`, or Active -> Archived once
    /// the retry budget is spent. Returns the state the task ended up in.
    async fn retry(
        &self,
        id: TaskId,
        lease: LeaseId,
        error: &str,
        backoff: Duration,
    ) -> SpindleResult<TaskState>;

    /// Active -> Archived regardless of the remaining budget.
    async fn archive(&self, id: TaskId, lease: LeaseId, error: &str) -> SpindleResult<()>;

    /// Push the lease expiry to `now + lease_for`.
    async fn extend_lease(
        &self,
        id: TaskId,
        lease: LeaseId,
        lease_for: Duration,
    ) -> SpindleResult<DateTime<Utc>>;

    /// Scheduled / retry tasks whose `process_at` elapsed -> pending.
    async fn promote_scheduled(&self) -> SpindleResult<usize>;

    /// Active tasks whose lease expired -> pending.
    async fn reclaim_expired_leases(&self) -> SpindleResult<usize>;

    async fn task_info(&self, id: TaskId) -> SpindleResult<Option<TaskInfo>>;

    async fn queue_stats(&self, queue: &QueueName) -> SpindleResult<QueueStats>;

    /// Release backend resources. Later calls fail with `StoreUnavailable`.
    async fn close(&self) -> SpindleResult<()>;
}
