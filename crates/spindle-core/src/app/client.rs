//! Client - envelope を組み立てて store に投入する
//!
//! client は追加するだけで、既存タスクの状態は変更しません。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::app::retry::retry_transient;
use crate::domain::{
    DEFAULT_MAX_RETRY, DEFAULT_TIMEOUT, EnqueueOptions, QueueName, Task, TaskEnvelope, TaskId,
    TaskInfo,
};
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// Store calls retried on `StoreUnavailable` before giving up.
const STORE_RETRIES: u32 = 3;
const STORE_RETRY_BASE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct Client {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    default_queue: QueueName,
}

impl Client {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            store,
            clock,
            ids,
            default_queue: QueueName::default(),
        }
    }

    /// Queue used when `EnqueueOptions::queue` is unset.
    pub fn with_default_queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn default_queue(&self) -> &QueueName {
        &self.default_queue
    }

    /// Build an envelope for `task` and store it.
    ///
    /// The task is pending when its `process_at` is not in the future,
    /// scheduled otherwise.
    pub async fn enqueue(&self, task: Task, options: EnqueueOptions) -> SpindleResult<TaskInfo> {
        options.validate()?;
        if task.task_type().as_str().is_empty() {
            return Err(SpindleError::InvalidOption("task type must not be empty".into()));
        }

        let now = self.clock.now();
        let process_at = options.resolve_process_at(now)?;
        let (task_type, payload) = task.into_parts();
        let envelope = TaskEnvelope::new(
            self.ids.generate_task_id(),
            task_type,
            payload,
            options.queue.unwrap_or_else(|| self.default_queue.clone()),
            options.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            options.timeout.unwrap_or(DEFAULT_TIMEOUT),
            now,
        );

        let info = retry_transient(STORE_RETRIES, STORE_RETRY_BASE, || {
            self.store.enqueue(envelope.clone(), process_at)
        })
        .await?;

        info!(
            task_id = %info.id(),
            task_type = %info.envelope.task_type(),
            queue = %info.envelope.queue(),
            state = %info.state,
            process_at = %info.process_at,
            "task enqueued"
        );
        Ok(info)
    }

    /// Enqueue to run after `delay`.
    pub async fn enqueue_in(
        &self,
        task: Task,
        delay: Duration,
        options: EnqueueOptions,
    ) -> SpindleResult<TaskInfo> {
        self.enqueue(task, options.process_in(delay)).await
    }

    /// Enqueue to run at `at`.
    pub async fn enqueue_at(
        &self,
        task: Task,
        at: DateTime<Utc>,
        options: EnqueueOptions,
    ) -> SpindleResult<TaskInfo> {
        self.enqueue(task, options.process_at(at)).await
    }

    pub async fn task_info(&self, id: TaskId) -> SpindleResult<Option<TaskInfo>> {
        debug!(task_id = %id, "task info lookup");
        retry_transient(STORE_RETRIES, STORE_RETRY_BASE, || self.store.task_info(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::impls::InMemoryTaskStore;
    use crate::ports::ManualClock;
    use chrono::TimeZone;

    fn setup() -> (Arc<ManualClock>, Arc<InMemoryTaskStore>, Client) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let client = Client::with_clock(store.clone(), clock.clone());
        (clock, store, client)
    }

    #[tokio::test]
    async fn immediate_enqueue_is_pending_with_defaults() {
        let (clock, _store, client) = setup();
        let info = client
            .enqueue(Task::new("demo:echo", "hi"), EnqueueOptions::new())
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Pending);
        assert!(info.process_at <= clock.now());
        assert_eq!(info.envelope.queue().as_str(), "default");
        assert_eq!(info.envelope.max_retry(), DEFAULT_MAX_RETRY);
        assert_eq!(info.envelope.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(info.envelope.payload(), b"hi");
    }

    #[tokio::test]
    async fn delayed_enqueue_is_scheduled() {
        let (clock, _store, client) = setup();
        let info = client
            .enqueue_in(
                Task::new("demo:echo", "later"),
                Duration::from_secs(5),
                EnqueueOptions::new().queue("low"),
            )
            .await
            .unwrap();

        assert_eq!(info.state, TaskState::Scheduled);
        assert_eq!(info.process_at, clock.now() + chrono::Duration::seconds(5));
        assert_eq!(info.envelope.queue().as_str(), "low");
    }

    #[tokio::test]
    async fn enqueue_at_in_the_past_is_pending() {
        let (clock, _store, client) = setup();
        let info = client
            .enqueue_at(
                Task::new("demo:echo", "now"),
                clock.now() - chrono::Duration::seconds(1),
                EnqueueOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(info.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn conflicting_delay_options_are_rejected() {
        let (clock, _store, client) = setup();
        let opts = EnqueueOptions::new()
            .process_in(Duration::from_secs(1))
            .process_at(clock.now());
        let err = client
            .enqueue(Task::new("demo:echo", ""), opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidOption(_)));
    }

    #[tokio::test]
    async fn delay_past_the_calendar_is_rejected() {
        let (_clock, store, client) = setup();
        let err = client
            .enqueue_in(
                Task::new("demo:echo", ""),
                Duration::from_secs(10_000_000_000_000),
                EnqueueOptions::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidOption(_)));
        let stats = store.queue_stats(&QueueName::default()).await.unwrap();
        assert_eq!(stats, Default::default());
    }

    #[tokio::test]
    async fn empty_task_type_is_rejected() {
        let (_clock, _store, client) = setup();
        let err = client
            .enqueue(Task::new("", "x"), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidOption(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_store_surfaces_after_bounded_retries() {
        let (_clock, store, client) = setup();
        store.set_available(false);
        let err = client
            .enqueue(Task::new("demo:echo", "x"), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn task_info_reads_back() {
        let (_clock, _store, client) = setup();
        let info = client
            .enqueue(Task::new("demo:echo", "x"), EnqueueOptions::new())
            .await
            .unwrap();
        let read = client.task_info(info.id()).await.unwrap().unwrap();
        assert_eq!(read, info);
    }
}
