//! Server - タスク実行ループ
//!
//! # slot のライフサイクル
//! Idle → Claimed → Executing → {Acked | Retried | Archived} → Idle
//!
//! # フロー
//! 1. semaphore の permit を取る（同時実行数 = `concurrency`）
//! 2. QueueSelector の順で dequeue（空なら `poll_interval` 待つ）
//! 3. handler を別タスクで実行（panic も失敗として扱う）、timeout と lease heartbeat 付き
//! 4. 結果を store に反映：成功 → ack、permanent → archive、それ以外 → retry
//!
//! # Shutdown
//! - `shutdown()` で新しい claim を止める
//! - 実行中の handler の context を cancel し、`shutdown_timeout` まで結果を待つ
//! - 超えた分は abort（store 上は Active のまま、lease 期限切れで回収）

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::app::retry::{RetryPolicy, retry_transient};
use crate::app::selector::QueueSelector;
use crate::domain::{QueueWeights, TaskEnvelope, TaskState};
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{ClaimedTask, Clock, Lease, SystemClock, TaskStore};
use crate::typed::{HandlerRegistry, TaskContext};

const STORE_RETRY_BASE: Duration = Duration::from_millis(100);
/// Upper bound for lease and backoff durations.
const MAX_SPAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum handlers running at once.
    pub concurrency: usize,
    pub queues: QueueWeights,
    /// Always try queues in weight order instead of weighted random order.
    pub strict_priority: bool,
    pub shutdown_timeout: Duration,
    /// Wait after an empty poll.
    pub poll_interval: Duration,
    /// Lease granted per claim; renewed every third of it while the handler runs.
    pub lease_duration: Duration,
    pub retry: RetryPolicy,
    /// Retries for ack/retry/archive calls that hit `StoreUnavailable`.
    pub store_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            queues: QueueWeights::default(),
            strict_priority: false,
            shutdown_timeout: Duration::from_secs(8),
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            store_retries: 3,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> SpindleResult<()> {
        if self.concurrency == 0 {
            return Err(SpindleError::Config("concurrency must be at least 1".into()));
        }
        if self.queues.is_empty() {
            return Err(SpindleError::Config("at least one queue is required".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SpindleError::Config("poll_interval must be positive".into()));
        }
        if self.lease_duration < Duration::from_millis(30) {
            return Err(SpindleError::Config("lease_duration must be at least 30ms".into()));
        }
        if self.lease_duration > MAX_SPAN || self.retry.max_delay > MAX_SPAN {
            return Err(SpindleError::Config(
                "lease_duration and retry max_delay must not exceed 365 days".into(),
            ));
        }
        Ok(())
    }
}

/// How an attempt ended, before it is reported to the store.
#[derive(Debug)]
enum Outcome {
    Success,
    Failed(SpindleError),
    /// Heartbeat found the lease gone; someone else owns the task now.
    LeaseLost,
}

/// Aborts the handler task when the slot is dropped (timeout or shutdown abort).
struct AbortOnDrop(JoinHandle<SpindleResult<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a slot needs, shared by all slots.
struct Executor {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    lease_duration: Duration,
    store_retries: u32,
}

impl Executor {
    async fn execute(&self, claimed: ClaimedTask, cancel: CancellationToken) {
        let ClaimedTask {
            envelope,
            lease,
            retry_count,
        } = claimed;
        debug!(attempt = retry_count + 1, "task claimed");

        let outcome = self.attempt(&envelope, lease, retry_count, cancel).await;
        self.report(&envelope, lease, retry_count, outcome).await;
    }

    async fn attempt(
        &self,
        envelope: &TaskEnvelope,
        lease: Lease,
        retry_count: u32,
        cancel: CancellationToken,
    ) -> Outcome {
        let handler = match self.registry.resolve(envelope.task_type()) {
            Ok(handler) => handler,
            Err(err) => return Outcome::Failed(err),
        };

        let now = self.clock.now();
        let deadline = chrono::Duration::from_std(envelope.timeout())
            .ok()
            .and_then(|t| now.checked_add_signed(t))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let ctx = TaskContext::new(
            envelope.id(),
            envelope.task_type().clone(),
            envelope.queue().clone(),
            retry_count,
            envelope.max_retry(),
            deadline,
            cancel,
        );

        let payload = envelope.payload().to_vec();
        let mut running = AbortOnDrop(tokio::spawn(
            async move { handler.process(ctx, &payload).await }.in_current_span(),
        ));
        let work = tokio::time::timeout(envelope.timeout(), &mut running.0);
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(self.lease_duration / 3);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut work => {
                    return match result {
                        Ok(Ok(Ok(()))) => Outcome::Success,
                        Ok(Ok(Err(err))) => Outcome::Failed(err),
                        Ok(Err(join_err)) if join_err.is_panic() => {
                            Outcome::Failed(SpindleError::handler("handler panicked"))
                        }
                        Ok(Err(join_err)) => {
                            Outcome::Failed(SpindleError::handler(format!("handler aborted: {join_err}")))
                        }
                        Err(_elapsed) => Outcome::Failed(SpindleError::Timeout),
                    };
                }
                _ = heartbeat.tick() => {
                    match self.store.extend_lease(envelope.id(), lease.id, self.lease_duration).await {
                        Ok(expires_at) => debug!(%expires_at, "lease extended"),
                        Err(SpindleError::LeaseLost(_)) | Err(SpindleError::TaskNotFound(_)) => {
                            return Outcome::LeaseLost;
                        }
                        Err(err) => warn!(error = %err, "lease heartbeat failed"),
                    }
                }
            }
        }
    }

    async fn report(&self, envelope: &TaskEnvelope, lease: Lease, retry_count: u32, outcome: Outcome) {
        let id = envelope.id();
        let result = match outcome {
            Outcome::Success => retry_transient(self.store_retries, STORE_RETRY_BASE, || {
                self.store.ack(id, lease.id)
            })
            .await
            .map(|()| {
                info!("task completed");
            }),
            Outcome::Failed(err) if err.is_permanent() => {
                let message = err.to_string();
                retry_transient(self.store_retries, STORE_RETRY_BASE, || {
                    self.store.archive(id, lease.id, &message)
                })
                .await
                .map(|()| {
                    error!(error = %message, "task archived without retry");
                })
            }
            Outcome::Failed(err) => {
                let message = err.to_string();
                let backoff = self.retry.next_delay(retry_count);
                retry_transient(self.store_retries, STORE_RETRY_BASE, || {
                    self.store.retry(id, lease.id, &message, backoff)
                })
                .await
                .map(|state| match state {
                    TaskState::Archived => error!(
                        error = %message,
                        attempts = retry_count + 1,
                        "task archived, retry budget spent"
                    ),
                    _ => warn!(
                        error = %message,
                        retry_count = retry_count + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "task failed, retry scheduled"
                    ),
                })
            }
            Outcome::LeaseLost => {
                warn!("lease lost while running, result discarded");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(SpindleError::LeaseLost(_)) => {
                warn!("lease expired before the result was recorded");
            }
            Err(err) => {
                // Left Active; lease expiry puts it back to pending.
                error!(error = %err, "failed to record task result");
            }
        }
    }
}

pub struct Server {
    executor: Arc<Executor>,
    selector: QueueSelector,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Server {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        config: ServerConfig,
    ) -> SpindleResult<Self> {
        Self::with_clock(store, registry, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        config: ServerConfig,
        clock: Arc<dyn Clock>,
    ) -> SpindleResult<Self> {
        config.validate()?;
        let selector = QueueSelector::new(&config.queues, config.strict_priority);
        let executor = Arc::new(Executor {
            store,
            registry,
            clock,
            retry: config.retry,
            lease_duration: config.lease_duration,
            store_retries: config.store_retries,
        });
        Ok(Self {
            executor,
            selector,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the queue selector (seeded selectors in tests).
    pub fn with_selector(mut self, selector: QueueSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop claiming new tasks; `run` then drains and returns.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Claim and execute tasks until `shutdown`, then wait for in-flight
    /// handlers up to `shutdown_timeout`.
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues.iter().collect::<Vec<_>>(),
            strict_priority = self.config.strict_priority,
            "server started"
        );

        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let handler_cancel = CancellationToken::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(done) = in_flight.try_join_next() {
                if let Err(err) = done {
                    error!(error = %err, "slot task failed");
                }
            }

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let order = self.selector.order();
            let claimed = match self
                .executor
                .store
                .dequeue(&order, self.config.lease_duration)
                .await
            {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    drop(permit);
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    drop(permit);
                    warn!(error = %err, "dequeue failed");
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
            };

            let span = info_span!(
                "task",
                task_id = %claimed.envelope.id(),
                task_type = %claimed.envelope.task_type(),
                queue = %claimed.envelope.queue(),
            );
            let executor = Arc::clone(&self.executor);
            let cancel = handler_cancel.child_token();
            in_flight.spawn(
                async move {
                    executor.execute(claimed, cancel).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }

        self.drain(in_flight, handler_cancel).await;
    }

    /// Sleep `poll_interval`; true when shutdown was requested meanwhile.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, handler_cancel: CancellationToken) {
        let pending = in_flight.len();
        info!(in_flight = pending, "server stopping, no new tasks will be claimed");
        handler_cancel.cancel();

        let finished = tokio::time::timeout(self.config.shutdown_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if finished.is_err() {
            warn!(
                abandoned = in_flight.len(),
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "shutdown timeout reached, abandoning running tasks until their leases expire"
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
        info!("server stopped");
    }
}
