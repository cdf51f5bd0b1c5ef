//! ReaperLoop - Lease 期限切れの回収
//!
//! # フロー
//! 1. TaskStore::reclaim_expired_leases() で期限切れを回収
//! 2. active → pending へ遷移（at-least-once: 別の worker が再実行する）
//!
//! 回収は attempt として数えません（retry_count は変わらない）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::TaskStore;

pub struct ReaperLoop {
    store: Arc<dyn TaskStore>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn TaskStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run_once(&self) -> usize {
        match self.store.reclaim_expired_leases().await {
            Ok(0) => 0,
            Ok(n) => {
                info!(reclaimed = n, "expired leases reclaimed");
                n
            }
            Err(err) => {
                warn!(error = %err, "reclaim_expired_leases failed");
                0
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
        debug!("reaper loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Client;
    use crate::domain::{EnqueueOptions, QueueName, Task, TaskState};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::ManualClock;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn expired_lease_returns_task_without_spending_retries() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let client = Client::with_clock(store.clone(), clock.clone());
        let info = client
            .enqueue(Task::new("t", ""), EnqueueOptions::new())
            .await
            .unwrap();
        store
            .dequeue(&[QueueName::default()], Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let reaper = ReaperLoop::new(store.clone(), Duration::from_millis(100));
        assert_eq!(reaper.run_once().await, 0);

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(reaper.run_once().await, 1);

        let info = store.task_info(info.id()).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Pending);
        assert_eq!(info.retry_count, 0);
        assert_eq!(info.last_error.as_deref(), Some("lease expired"));
    }
}
