//! Scheduler - 周期タスクの投入
//!
//! # フロー
//! 1. `tick_interval` ごとに起きる
//! 2. `next_fire <= now` の entry を発火（境界は inclusive）
//! 3. Client 経由で新しい envelope を投入（毎回新しい TaskId）
//! 4. `next_fire` を前回の発火時刻から `now` より後へ進める
//!
//! 発火の失敗はログに残すだけで、`next_fire` は進めます。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::client::Client;
use crate::app::schedule_spec::ScheduleSpec;
use crate::domain::{EnqueueOptions, EntryId, Task, TaskType};
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "crate::domain::task::duration_ms", rename = "tick_interval_ms")]
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Registered periodic task.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: EntryId,
    pub spec: ScheduleSpec,
    pub task: Task,
    pub options: EnqueueOptions,
    pub next_fire: Option<DateTime<Utc>>,
    pub prev_fire: Option<DateTime<Utc>>,
    pub fire_count: u64,
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub id: EntryId,
    pub spec: String,
    pub task_type: TaskType,
    pub next_fire: Option<DateTime<Utc>>,
    pub prev_fire: Option<DateTime<Utc>>,
    pub fire_count: u64,
}

impl From<&ScheduleEntry> for EntryInfo {
    fn from(entry: &ScheduleEntry) -> Self {
        Self {
            id: entry.id,
            spec: entry.spec.to_string(),
            task_type: entry.task.task_type().clone(),
            next_fire: entry.next_fire,
            prev_fire: entry.prev_fire,
            fire_count: entry.fire_count,
        }
    }
}

pub struct Scheduler {
    client: Client,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: SchedulerConfig,
    entries: Mutex<BTreeMap<EntryId, ScheduleEntry>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(client: Client, config: SchedulerConfig) -> Self {
        Self::with_clock(client, config, Arc::new(SystemClock))
    }

    pub fn with_clock(client: Client, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            client,
            clock,
            ids,
            config,
            entries: Mutex::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<EntryId, ScheduleEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `task` to be enqueued on `spec`.
    ///
    /// `options` may set queue, retry budget and timeout; delays are not
    /// allowed since every firing is processed immediately.
    pub fn register(
        &self,
        spec: &str,
        task: Task,
        options: EnqueueOptions,
    ) -> SpindleResult<EntryId> {
        let spec = ScheduleSpec::parse(spec)?;
        options.validate()?;
        if options.process_in.is_some() || options.process_at.is_some() {
            return Err(SpindleError::InvalidOption(
                "periodic tasks cannot carry process_in/process_at".into(),
            ));
        }
        if task.task_type().as_str().is_empty() {
            return Err(SpindleError::InvalidOption("task type must not be empty".into()));
        }

        let now = self.clock.now();
        let entry = ScheduleEntry {
            id: self.ids.generate_entry_id(),
            next_fire: spec.first_after(now),
            spec,
            task,
            options,
            prev_fire: None,
            fire_count: 0,
        };
        let id = entry.id;
        info!(
            entry_id = %id,
            spec = %entry.spec,
            task_type = %entry.task.task_type(),
            next_fire = ?entry.next_fire,
            "schedule entry registered"
        );
        self.lock_entries().insert(id, entry);
        Ok(id)
    }

    /// Returns false when `id` was not registered.
    pub fn unregister(&self, id: EntryId) -> bool {
        let removed = self.lock_entries().remove(&id).is_some();
        if removed {
            info!(entry_id = %id, "schedule entry unregistered");
        }
        removed
    }

    pub fn entries(&self) -> Vec<EntryInfo> {
        self.lock_entries().values().map(EntryInfo::from).collect()
    }

    /// Fire every due entry once. Returns how many envelopes were enqueued.
    pub async fn tick(&self) -> usize {
        let now = self.clock.now();

        // Advance under the lock, enqueue after releasing it.
        let due: Vec<(EntryId, Task, EnqueueOptions)> = {
            let mut entries = self.lock_entries();
            entries
                .values_mut()
                .filter(|e| e.next_fire.is_some_and(|next| next <= now))
                .filter_map(|e| {
                    let fired_at = e.next_fire?;
                    e.prev_fire = Some(fired_at);
                    e.next_fire = e.spec.next_after(fired_at, now);
                    e.fire_count += 1;
                    Some((e.id, e.task.clone(), e.options.clone()))
                })
                .collect()
        };

        let mut enqueued = 0;
        for (entry_id, task, options) in due {
            match self.client.enqueue(task, options).await {
                Ok(info) => {
                    debug!(entry_id = %entry_id, task_id = %info.id(), "schedule entry fired");
                    enqueued += 1;
                }
                Err(err) => {
                    error!(entry_id = %entry_id, error = %err, "schedule entry failed to enqueue");
                }
            }
        }
        enqueued
    }

    /// Tick every `tick_interval` until `shutdown` is called.
    pub async fn run(&self) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            entries = self.lock_entries().len(),
            "scheduler started"
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Stop `run`. Entries stay registered.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueName, TaskState};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{ManualClock, TaskStore};
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryTaskStore>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let client = Client::with_clock(store.clone(), clock.clone());
        let scheduler = Scheduler::with_clock(client, SchedulerConfig::default(), clock.clone());
        Fixture {
            clock,
            store,
            scheduler,
        }
    }

    async fn pending(store: &InMemoryTaskStore) -> usize {
        store
            .queue_stats(&QueueName::default())
            .await
            .unwrap()
            .count(TaskState::Pending)
    }

    #[tokio::test]
    async fn every_30s_over_61s_fires_twice() {
        let f = fixture();
        f.scheduler
            .register("@every 30s", Task::new("demo:heartbeat", "{}"), EnqueueOptions::new())
            .unwrap();

        let mut fired = 0;
        for _ in 0..=61 {
            fired += f.scheduler.tick().await;
            f.clock.advance(chrono::Duration::seconds(1));
        }

        assert_eq!(fired, 2);
        assert_eq!(pending(&f.store).await, 2);
    }

    #[tokio::test]
    async fn fire_time_equal_to_tick_fires_on_that_tick() {
        let f = fixture();
        f.scheduler
            .register("@every 30s", Task::new("demo:heartbeat", "{}"), EnqueueOptions::new())
            .unwrap();

        f.clock.advance(chrono::Duration::seconds(29));
        assert_eq!(f.scheduler.tick().await, 0);
        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.scheduler.tick().await, 1);
    }

    #[tokio::test]
    async fn missed_ticks_do_not_burst() {
        let f = fixture();
        let id = f
            .scheduler
            .register("@every 30s", Task::new("demo:heartbeat", "{}"), EnqueueOptions::new())
            .unwrap();

        f.clock.advance(chrono::Duration::seconds(125));
        assert_eq!(f.scheduler.tick().await, 1);

        let entry = f.scheduler.entries().into_iter().find(|e| e.id == id).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(entry.prev_fire, Some(start + chrono::Duration::seconds(30)));
        assert_eq!(entry.next_fire, Some(start + chrono::Duration::seconds(150)));
        assert_eq!(entry.fire_count, 1);
    }

    #[tokio::test]
    async fn each_firing_is_a_new_task() {
        let f = fixture();
        f.scheduler
            .register(
                "@every 1s",
                Task::new("demo:heartbeat", "{}"),
                EnqueueOptions::new().queue("low"),
            )
            .unwrap();

        for _ in 0..3 {
            f.clock.advance(chrono::Duration::seconds(1));
            f.scheduler.tick().await;
        }

        let mut ids = Vec::new();
        while let Some(claimed) = f
            .store
            .dequeue(&[QueueName::new("low")], Duration::from_secs(30))
            .await
            .unwrap()
        {
            ids.push(claimed.envelope.id());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_at_registration() {
        let f = fixture();
        let err = f
            .scheduler
            .register("every thirty seconds", Task::new("x", ""), EnqueueOptions::new())
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidSpec { .. }));
        assert!(f.scheduler.entries().is_empty());
    }

    #[tokio::test]
    async fn delayed_options_are_rejected() {
        let f = fixture();
        let err = f
            .scheduler
            .register(
                "@every 1s",
                Task::new("x", ""),
                EnqueueOptions::new().process_in(Duration::from_secs(1)),
            )
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidOption(_)));
    }

    #[tokio::test]
    async fn unregistered_entry_stops_firing() {
        let f = fixture();
        let id = f
            .scheduler
            .register("@every 1s", Task::new("demo:heartbeat", "{}"), EnqueueOptions::new())
            .unwrap();

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.scheduler.tick().await, 1);

        assert!(f.scheduler.unregister(id));
        assert!(!f.scheduler.unregister(id));
        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.scheduler.tick().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_failure_still_advances() {
        let f = fixture();
        let id = f
            .scheduler
            .register("@every 1s", Task::new("demo:heartbeat", "{}"), EnqueueOptions::new())
            .unwrap();

        f.store.close().await.unwrap();
        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.scheduler.tick().await, 0);

        let entry = f.scheduler.entries().into_iter().find(|e| e.id == id).unwrap();
        assert_eq!(entry.fire_count, 1);
        assert_eq!(
            entry.next_fire,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        let scheduler = Arc::new(f.scheduler);
        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        scheduler.shutdown();
        handle.await.unwrap();
        assert!(scheduler.is_shutdown());
    }
}
