use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use spindle_core::config::{SpindleConfig, StoreBackend, StoreSection};
use spindle_core::domain::EnqueueOptions;
use spindle_core::error::{SpindleError, SpindleResult};
use spindle_core::impls::InMemoryTaskStore;
use spindle_core::ports::TaskStore;
use spindle_core::telemetry::init_tracing;
use spindle_core::typed::{Handler, PayloadHandler, TaskContext, TaskPayload};
use spindle_core::{AppBuilder, Task};

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
    message: String,
}

impl TaskPayload for Echo {
    const TYPE: &'static str = "demo:echo";
}

struct EchoHandler;

#[async_trait]
impl PayloadHandler<Echo> for EchoHandler {
    async fn handle(&self, ctx: TaskContext, payload: Echo) -> SpindleResult<()> {
        info!(task_id = %ctx.id(), message = %payload.message, "echo");
        Ok(())
    }
}

/// Fails its first `failures` attempts, then succeeds.
struct FlakyHandler {
    failures: AtomicU32,
}

#[async_trait]
impl Handler for FlakyHandler {
    async fn process(&self, ctx: TaskContext, _payload: &[u8]) -> SpindleResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SpindleError::handler(format!(
                "intentional failure (left={left}, attempt={})",
                ctx.retry_count() + 1
            )));
        }
        info!(task_id = %ctx.id(), "flaky task finally succeeded");
        Ok(())
    }
}

struct HeartbeatHandler;

#[async_trait]
impl Handler for HeartbeatHandler {
    async fn process(&self, ctx: TaskContext, _payload: &[u8]) -> SpindleResult<()> {
        info!(task_id = %ctx.id(), queue = %ctx.queue(), "heartbeat");
        Ok(())
    }
}

#[cfg(feature = "redis")]
async fn open_store(cfg: &StoreSection) -> anyhow::Result<Arc<dyn TaskStore>> {
    use spindle_core::impls::{RedisStoreConfig, RedisTaskStore};

    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(
            InMemoryTaskStore::new().with_archive_retention(cfg.archive_retention()),
        )),
        StoreBackend::Redis => {
            let mut redis = RedisStoreConfig::new(cfg.redis_addr.clone())
                .with_key_prefix(cfg.key_prefix.clone())
                .with_archive_retention(cfg.archive_retention());
            if let Some(password) = &cfg.redis_password {
                redis = redis.with_password(password.clone());
            }
            let store = RedisTaskStore::connect(redis)
                .await
                .with_context(|| format!("connecting to redis at {}", cfg.redis_addr))?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn open_store(cfg: &StoreSection) -> anyhow::Result<Arc<dyn TaskStore>> {
    match cfg.backend {
        StoreBackend::Memory => Ok(Arc::new(
            InMemoryTaskStore::new().with_archive_retention(cfg.archive_retention()),
        )),
        StoreBackend::Redis => anyhow::bail!("built without the `redis` feature"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = SpindleConfig::load().context("loading configuration")?;
    init_tracing(&cfg.logging);
    info!(backend = ?cfg.store.backend, concurrency = cfg.server.concurrency, "starting spindle demo");

    let store = open_store(&cfg.store).await?;
    let app = AppBuilder::new(store)
        .handle_typed::<Echo, _>(EchoHandler)?
        .handle(
            "demo:flaky",
            FlakyHandler {
                failures: AtomicU32::new(2),
            },
        )?
        .handle("demo:heartbeat", HeartbeatHandler)?
        .expect_tasks(&[Echo::TYPE, "demo:flaky", "demo:heartbeat"])
        .server_config(cfg.server.to_server_config()?)
        .scheduler_config(cfg.scheduler.clone())
        .maintenance_intervals(cfg.server.promote_interval(), cfg.server.reap_interval())
        .build()?;

    let client = app.client();
    let echo = Echo {
        message: "hello from spindle".into(),
    };
    client
        .enqueue(echo.into_task()?, EnqueueOptions::new().queue("critical"))
        .await?;
    client
        .enqueue_in(
            Echo {
                message: "five seconds later".into(),
            }
            .into_task()?,
            Duration::from_secs(5),
            EnqueueOptions::new(),
        )
        .await?;
    let flaky = client
        .enqueue(
            Task::new("demo:flaky", Vec::new()),
            EnqueueOptions::new().queue("low").max_retry(3),
        )
        .await?;
    info!(task_id = %flaky.id(), "flaky task enqueued");

    let entry = app.scheduler().register(
        "@every 30s",
        Task::new("demo:heartbeat", Vec::new()),
        EnqueueOptions::new(),
    )?;
    info!(entry_id = %entry, "heartbeat scheduled");

    app.run_until_signal().await?;
    Ok(())
}
