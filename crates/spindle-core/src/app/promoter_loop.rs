//! PromoterLoop - scheduled / retry タスクを pending へ
//!
//! `process_at` を過ぎた scheduled / retry タスクを定期的に pending へ移します。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ports::TaskStore;

pub struct PromoterLoop {
    store: Arc<dyn TaskStore>,
    interval: Duration,
}

impl PromoterLoop {
    pub fn new(store: Arc<dyn TaskStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One promotion pass. Store errors are logged and reported as 0.
    pub async fn run_once(&self) -> usize {
        match self.store.promote_scheduled().await {
            Ok(0) => 0,
            Ok(n) => {
                debug!(promoted = n, "due tasks moved to pending");
                n
            }
            Err(err) => {
                warn!(error = %err, "promote_scheduled failed");
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
        debug!("promoter loop stopped");
    }
}
