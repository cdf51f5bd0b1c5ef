//! In-memory task store.
//!
//! Reference implementation of `TaskStore` used by tests and the demo when no
//! Redis address is configured. Not durable across restarts.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{LeaseId, QueueName, TaskEnvelope, TaskId, TaskInfo, TaskState};
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{
    ArchiveRetention, ClaimedTask, Clock, IdGenerator, Lease, QueueStats, SystemClock, TaskStore,
    UlidGenerator,
};

/// Store-owned mutable part of a task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Queue structures (pending/delayed) hold TaskId only.
#[derive(Debug, Clone)]
struct TaskRecord {
    envelope: TaskEnvelope,
    state: TaskState,
    process_at: DateTime<Utc>,
    retry_count: u32,
    last_error: Option<String>,
    last_failed_at: Option<DateTime<Utc>>,
    lease: Option<Lease>,
}

impl TaskRecord {
    fn info(&self) -> TaskInfo {
        TaskInfo {
            envelope: self.envelope.clone(),
            state: self.state,
            process_at: self.process_at,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            last_failed_at: self.last_failed_at,
        }
    }

    fn transition(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }

    fn holds(&self, lease: LeaseId) -> bool {
        self.state == TaskState::Active && self.lease.map(|l| l.id) == Some(lease)
    }
}

/// Scheduled/retry entry for the min-heap.
///
/// Entries are not removed eagerly; a popped entry is ignored unless the record
/// is still waiting with the same `process_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DelayedTask {
    process_at: DateTime<Utc>,
    task_id: TaskId,
}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .process_at
            .cmp(&self.process_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

#[derive(Default)]
struct InMemoryState {
    records: HashMap<TaskId, TaskRecord>,
    pending: HashMap<QueueName, VecDeque<TaskId>>,
    delayed: BinaryHeap<DelayedTask>,
    active: HashSet<TaskId>,
    /// Per queue, oldest first.
    archived: HashMap<QueueName, VecDeque<(DateTime<Utc>, TaskId)>>,
}

impl InMemoryState {
    fn push_pending(&mut self, queue: &QueueName, id: TaskId) {
        self.pending.entry(queue.clone()).or_default().push_back(id);
    }

    fn push_delayed(&mut self, process_at: DateTime<Utc>, id: TaskId) {
        self.delayed.push(DelayedTask {
            process_at,
            task_id: id,
        });
    }

    fn push_archived(
        &mut self,
        queue: &QueueName,
        id: TaskId,
        now: DateTime<Utc>,
        retention: ArchiveRetention,
    ) {
        let cutoff = retention.cutoff(now);
        let archived = self.archived.entry(queue.clone()).or_default();
        archived.push_back((now, id));

        let mut dropped = Vec::new();
        while let Some(&(archived_at, oldest)) = archived.front() {
            if archived.len() <= retention.max_tasks && archived_at >= cutoff {
                break;
            }
            archived.pop_front();
            dropped.push(oldest);
        }
        for id in &dropped {
            self.records.remove(id);
        }
        if !dropped.is_empty() {
            debug!(queue = %queue, trimmed = dropped.len(), "archive trimmed");
        }
    }

    fn owned_record(&mut self, id: TaskId, lease: LeaseId) -> SpindleResult<&mut TaskRecord> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(SpindleError::TaskNotFound(id))?;
        if !record.holds(lease) {
            return Err(SpindleError::LeaseLost(id));
        }
        Ok(record)
    }
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retention: ArchiveRetention,
    available: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            state: Mutex::new(InMemoryState::default()),
            clock,
            ids,
            retention: ArchiveRetention::default(),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_archive_retention(mut self, retention: ArchiveRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Simulate a backend outage: every call fails with `StoreUnavailable`.
    #[cfg(test)]
    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> SpindleResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SpindleError::StoreUnavailable("in-memory store closed".into()))
        }
    }

    fn lease_deadline(&self, lease_for: Duration) -> SpindleResult<DateTime<Utc>> {
        let lease_for = chrono::Duration::from_std(lease_for)
            .map_err(|e| SpindleError::InvalidOption(format!("lease duration: {e}")))?;
        self.clock.now().checked_add_signed(lease_for).ok_or_else(|| {
            SpindleError::InvalidOption("lease duration is beyond the supported date range".into())
        })
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn enqueue(
        &self,
        envelope: TaskEnvelope,
        process_at: DateTime<Utc>,
    ) -> SpindleResult<TaskInfo> {
        self.ensure_available()?;
        let now = self.clock.now();
        let id = envelope.id();
        let queue = envelope.queue().clone();
        let state = if process_at <= now {
            TaskState::Pending
        } else {
            TaskState::Scheduled
        };

        let record = TaskRecord {
            envelope,
            state,
            process_at,
            retry_count: 0,
            last_error: None,
            last_failed_at: None,
            lease: None,
        };
        let info = record.info();

        let mut st = self.state.lock().await;
        if st.records.contains_key(&id) {
            return Err(SpindleError::InvalidOption(format!("task {id} already exists")));
        }
        st.records.insert(id, record);
        match state {
            TaskState::Pending => st.push_pending(&queue, id),
            _ => st.push_delayed(process_at, id),
        }
        debug!(task_id = %id, queue = %queue, state = %state, "task stored");
        Ok(info)
    }

    async fn dequeue(
        &self,
        queues: &[QueueName],
        lease_for: Duration,
    ) -> SpindleResult<Option<ClaimedTask>> {
        self.ensure_available()?;
        let expires_at = self.lease_deadline(lease_for)?;

        let mut st = self.state.lock().await;
        for queue in queues {
            let Some(task_id) = st.pending.get_mut(queue).and_then(VecDeque::pop_front) else {
                continue;
            };
            let Some(record) = st.records.get_mut(&task_id) else {
                continue;
            };
            let lease = Lease {
                id: self.ids.generate_lease_id(),
                expires_at,
            };
            record.transition(TaskState::Active);
            record.lease = Some(lease);
            let claimed = ClaimedTask {
                envelope: record.envelope.clone(),
                lease,
                retry_count: record.retry_count,
            };
            st.active.insert(task_id);
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    async fn ack(&self, id: TaskId, lease: LeaseId) -> SpindleResult<()> {
        self.ensure_available()?;
        let mut st = self.state.lock().await;
        st.owned_record(id, lease)?;
        st.records.remove(&id);
        st.active.remove(&id);
        Ok(())
    }

    async fn retry(
        &self,
        id: TaskId,
        lease: LeaseId,
        error: &str,
        backoff: Duration,
    ) -> SpindleResult<TaskState> {
        self.ensure_available()?;
        let now = self.clock.now();
        let backoff = chrono::Duration::from_std(backoff)
            .map_err(|e| SpindleError::InvalidOption(format!("backoff: {e}")))?;
        let retry_at = now.checked_add_signed(backoff).ok_or_else(|| {
            SpindleError::InvalidOption("backoff is beyond the supported date range".into())
        })?;

        let mut st = self.state.lock().await;
        let record = st.owned_record(id, lease)?;
        record.lease = None;
        record.last_error = Some(error.to_string());
        record.last_failed_at = Some(now);

        let next = if record.retry_count >= record.envelope.max_retry() {
            record.transition(TaskState::Archived);
            TaskState::Archived
        } else {
            record.retry_count += 1;
            record.process_at = retry_at;
            record.transition(TaskState::Retry);
            TaskState::Retry
        };
        let process_at = record.process_at;
        let queue = record.envelope.queue().clone();

        st.active.remove(&id);
        if next == TaskState::Retry {
            st.push_delayed(process_at, id);
        } else {
            st.push_archived(&queue, id, now, self.retention);
        }
        Ok(next)
    }

    async fn archive(&self, id: TaskId, lease: LeaseId, error: &str) -> SpindleResult<()> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut st = self.state.lock().await;
        let record = st.owned_record(id, lease)?;
        record.lease = None;
        record.last_error = Some(error.to_string());
        record.last_failed_at = Some(now);
        record.transition(TaskState::Archived);
        let queue = record.envelope.queue().clone();
        st.active.remove(&id);
        st.push_archived(&queue, id, now, self.retention);
        Ok(())
    }

    async fn extend_lease(
        &self,
        id: TaskId,
        lease: LeaseId,
        lease_for: Duration,
    ) -> SpindleResult<DateTime<Utc>> {
        self.ensure_available()?;
        let expires_at = self.lease_deadline(lease_for)?;
        let mut st = self.state.lock().await;
        let record = st.owned_record(id, lease)?;
        record.lease = Some(Lease { id: lease, expires_at });
        Ok(expires_at)
    }

    async fn promote_scheduled(&self) -> SpindleResult<usize> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut st = self.state.lock().await;
        let mut promoted = 0;

        while let Some(entry) = st.delayed.peek() {
            if entry.process_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = st.delayed.pop() else {
                break;
            };

            let queue = match st.records.get_mut(&entry.task_id) {
                Some(record)
                    if matches!(record.state, TaskState::Scheduled | TaskState::Retry)
                        && record.process_at == entry.process_at =>
                {
                    record.transition(TaskState::Pending);
                    record.envelope.queue().clone()
                }
                _ => continue,
            };
            st.push_pending(&queue, entry.task_id);
            promoted += 1;
        }
        Ok(promoted)
    }

    async fn reclaim_expired_leases(&self) -> SpindleResult<usize> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut st = self.state.lock().await;

        let expired: Vec<TaskId> = st
            .active
            .iter()
            .filter(|id| {
                st.records
                    .get(id)
                    .and_then(|r| r.lease)
                    .is_some_and(|lease| lease.expires_at <= now)
            })
            .copied()
            .collect();

        for id in &expired {
            st.active.remove(id);
            let Some(record) = st.records.get_mut(id) else {
                continue;
            };
            record.lease = None;
            record.last_error = Some("lease expired".to_string());
            record.transition(TaskState::Pending);
            let queue = record.envelope.queue().clone();
            warn!(task_id = %id, queue = %queue, "lease expired, task returned to pending");
            st.push_pending(&queue, *id);
        }
        Ok(expired.len())
    }

    async fn task_info(&self, id: TaskId) -> SpindleResult<Option<TaskInfo>> {
        self.ensure_available()?;
        let st = self.state.lock().await;
        Ok(st.records.get(&id).map(TaskRecord::info))
    }

    async fn queue_stats(&self, queue: &QueueName) -> SpindleResult<QueueStats> {
        self.ensure_available()?;
        let st = self.state.lock().await;
        let mut stats = QueueStats::default();
        for record in st.records.values().filter(|r| r.envelope.queue() == queue) {
            stats.bump(record.state);
        }
        Ok(stats)
    }

    async fn close(&self) -> SpindleResult<()> {
        self.available.store(false, Ordering::SeqCst);
        Ok(())
    }
}
