//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_tasks() で期待される task_type を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す
//!
//! # Shutdown 順序
//! Scheduler 停止 → Server 停止（timeout 付き）→ promoter / reaper 停止 → Store close

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app::client::Client;
use crate::app::promoter_loop::PromoterLoop;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::scheduler::{Scheduler, SchedulerConfig};
use crate::app::server::{Server, ServerConfig};
use crate::domain::TaskType;
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::{Handler, HandlerRegistry, PayloadHandler, TaskPayload};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(store)
///     .handle("demo:echo", handler_fn(|_ctx, _payload| async { Ok(()) }))?
///     .handle_typed::<Welcome, _>(WelcomeHandler)?
///     .expect_tasks(&["demo:echo", "user:welcome"])
///     .build()?;
///
/// app.run_until_signal().await?;
/// ```
pub struct AppBuilder {
    store: Arc<dyn TaskStore>,
    registry: HandlerRegistry,
    expected_tasks: Option<Vec<TaskType>>,
    clock: Arc<dyn Clock>,
    server: ServerConfig,
    scheduler: SchedulerConfig,
    promote_interval: Duration,
    reap_interval: Duration,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Invalid(#[from] SpindleError),
}

impl AppBuilder {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            registry: HandlerRegistry::new(),
            expected_tasks: None,
            clock: Arc::new(SystemClock),
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            promote_interval: Duration::from_secs(1),
            reap_interval: Duration::from_secs(5),
        }
    }

    /// Handler を登録
    pub fn handle<H: Handler + 'static>(
        mut self,
        task_type: impl Into<TaskType>,
        handler: H,
    ) -> SpindleResult<Self> {
        self.registry.register(task_type, handler)?;
        Ok(self)
    }

    /// 型付き Handler を `T::TYPE` で登録
    pub fn handle_typed<T: TaskPayload, H: PayloadHandler<T> + 'static>(
        mut self,
        handler: H,
    ) -> SpindleResult<Self> {
        self.registry.register_typed::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| TaskType::new(*t)).collect());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.server = config;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// How often due scheduled/retry tasks are promoted and expired leases reclaimed.
    pub fn maintenance_intervals(mut self, promote: Duration, reap: Duration) -> Self {
        self.promote_interval = promote;
        self.reap_interval = reap;
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているかチェック
    /// - ServerConfig の検証
    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .map(|t| t.as_str().to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        if self.promote_interval.is_zero() || self.reap_interval.is_zero() {
            return Err(SpindleError::Config("maintenance intervals must be positive".into()).into());
        }

        let registry = Arc::new(self.registry);
        let client = Client::with_clock(Arc::clone(&self.store), Arc::clone(&self.clock));
        let server = Server::with_clock(
            Arc::clone(&self.store),
            Arc::clone(&registry),
            self.server,
            Arc::clone(&self.clock),
        )?;
        let scheduler = Scheduler::with_clock(client.clone(), self.scheduler, self.clock);

        info!(handlers = ?registry.registered_types(), "app built");
        Ok(App {
            store: self.store,
            client,
            server: Arc::new(server),
            scheduler: Arc::new(scheduler),
            promote_interval: self.promote_interval,
            reap_interval: self.reap_interval,
        })
    }
}

/// App は組み立て済みのランタイム
///
/// 起動前に `scheduler()` で周期タスクを登録し、`client()` で投入できます。
pub struct App {
    store: Arc<dyn TaskStore>,
    client: Client,
    server: Arc<Server>,
    scheduler: Arc<Scheduler>,
    promote_interval: Duration,
    reap_interval: Duration,
}

impl App {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Run every component until `shutdown` resolves, then stop them in order.
    pub async fn run_until<F>(self, shutdown: F) -> SpindleResult<()>
    where
        F: Future<Output = ()>,
    {
        let maintenance = CancellationToken::new();
        let promoter = tokio::spawn(
            PromoterLoop::new(Arc::clone(&self.store), self.promote_interval)
                .run(maintenance.clone()),
        );
        let reaper = tokio::spawn(
            ReaperLoop::new(Arc::clone(&self.store), self.reap_interval).run(maintenance.clone()),
        );
        let scheduler = {
            let scheduler = Arc::clone(&self.scheduler);
            tokio::spawn(async move { scheduler.run().await })
        };
        let server = {
            let server = Arc::clone(&self.server);
            tokio::spawn(async move { server.run().await })
        };
        info!("app running");

        shutdown.await;
        info!("shutdown requested");

        self.scheduler.shutdown();
        join("scheduler", scheduler).await;

        self.server.shutdown();
        join("server", server).await;

        maintenance.cancel();
        join("promoter", promoter).await;
        join("reaper", reaper).await;

        self.store.close().await?;
        info!("app stopped");
        Ok(())
    }

    /// `run_until` driven by SIGINT / SIGTERM.
    pub async fn run_until_signal(self) -> SpindleResult<()> {
        self.run_until(shutdown_signal()).await
    }
}

async fn join(name: &str, handle: JoinHandle<()>) {
    if let Err(err) = handle.await {
        error!(component = name, error = %err, "component task failed");
    }
}

/// Resolves on the first SIGINT (Ctrl-C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "signal received"),
        _ = terminate => info!(signal = "SIGTERM", "signal received"),
    }
}
