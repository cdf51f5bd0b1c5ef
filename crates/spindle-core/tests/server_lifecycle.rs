use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spindle_core::app::{AppBuilder, Client, RetryPolicy, Server, ServerConfig};
use spindle_core::domain::{EnqueueOptions, Task, TaskId, TaskState};
use spindle_core::error::SpindleError;
use spindle_core::impls::InMemoryTaskStore;
use spindle_core::ports::TaskStore;
use spindle_core::typed::{HandlerRegistry, handler_fn};

fn fast_server_config() -> ServerConfig {
    ServerConfig {
        concurrency: 4,
        poll_interval: Duration::from_millis(5),
        shutdown_timeout: Duration::from_millis(150),
        lease_duration: Duration::from_millis(90),
        retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(4)),
        store_retries: 0,
        ..ServerConfig::default()
    }
}

async fn state_of(store: &dyn TaskStore, id: TaskId) -> Option<TaskState> {
    store.task_info(id).await.unwrap().map(|info| info.state)
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..600 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn failing_task_runs_max_retry_plus_one_times() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let app = AppBuilder::new(store.clone())
        .handle(
            "import:row",
            handler_fn(move |_ctx, _payload| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SpindleError::handler("upstream refused"))
                }
            }),
        )
        .unwrap()
        .server_config(fast_server_config())
        .maintenance_intervals(Duration::from_millis(5), Duration::from_millis(50))
        .build()
        .unwrap();

    let info = app
        .client()
        .enqueue(Task::new("import:row", "42"), EnqueueOptions::new().max_retry(2))
        .await
        .unwrap();
    let id = info.id();

    let watched = store.clone();
    app.run_until(async move {
        eventually(|| {
            let store = watched.clone();
            async move { state_of(store.as_ref(), id).await == Some(TaskState::Archived) }
        })
        .await;
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn skip_retry_archives_on_first_failure() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let app = AppBuilder::new(store.clone())
        .handle(
            "import:row",
            handler_fn(move |_ctx, _payload| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SpindleError::skip_retry("malformed row"))
                }
            }),
        )
        .unwrap()
        .server_config(fast_server_config())
        .maintenance_intervals(Duration::from_millis(5), Duration::from_millis(50))
        .build()
        .unwrap();

    let info = app
        .client()
        .enqueue(Task::new("import:row", "x"), EnqueueOptions::new().max_retry(10))
        .await
        .unwrap();
    let id = info.id();

    let watched = store.clone();
    app.run_until(async move {
        eventually(|| {
            let store = watched.clone();
            async move { state_of(store.as_ref(), id).await == Some(TaskState::Archived) }
        })
        .await;
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn payload_reaches_the_handler_byte_for_byte() {
    let store = Arc::new(InMemoryTaskStore::new());
    let client = Client::new(store.clone());
    let received = Arc::new(Mutex::new(None::<Vec<u8>>));

    let mut registry = HandlerRegistry::new();
    let slot = received.clone();
    registry
        .register(
            "blob:store",
            handler_fn(move |_ctx, payload: Vec<u8>| {
                let slot = slot.clone();
                async move {
                    *slot.lock().unwrap() = Some(payload);
                    Ok(())
                }
            }),
        )
        .unwrap();

    let server = Arc::new(Server::new(store.clone(), Arc::new(registry), fast_server_config()).unwrap());
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let sent: Vec<u8> = (0..=255u8).chain([0xff, 0xfe, 0x00, 0xc3]).collect();
    client
        .enqueue(Task::new("blob:store", sent.clone()), EnqueueOptions::new())
        .await
        .unwrap();

    eventually(|| {
        let received = received.clone();
        async move { received.lock().unwrap().is_some() }
    })
    .await;

    server.shutdown();
    running.await.unwrap();
    assert_eq!(received.lock().unwrap().as_deref(), Some(sent.as_slice()));
}

#[tokio::test]
async fn shutdown_waits_for_quick_tasks_and_abandons_slow_ones() {
    let store = Arc::new(InMemoryTaskStore::new());
    let client = Client::new(store.clone());
    let started = Arc::new(AtomicU32::new(0));

    let mut registry = HandlerRegistry::new();
    let quick_started = started.clone();
    registry
        .register(
            "job:quick",
            handler_fn(move |_ctx, _payload| {
                let started = quick_started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok(())
                }
            }),
        )
        .unwrap();
    let slow_started = started.clone();
    registry
        .register(
            "job:slow",
            handler_fn(move |_ctx, _payload| {
                let started = slow_started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }),
        )
        .unwrap();

    let server = Arc::new(Server::new(store.clone(), Arc::new(registry), fast_server_config()).unwrap());
    let running = tokio::spawn({
        let server = server.clone();
        async move { server.run().await }
    });

    let quick = client
        .enqueue(Task::new("job:quick", ""), EnqueueOptions::new())
        .await
        .unwrap()
        .id();
    let slow = client
        .enqueue(
            Task::new("job:slow", ""),
            EnqueueOptions::new().timeout(Duration::from_secs(60)),
        )
        .await
        .unwrap()
        .id();

    eventually(|| {
        let started = started.clone();
        async move { started.load(Ordering::SeqCst) == 2 }
    })
    .await;

    let begun = Instant::now();
    server.shutdown();
    running.await.unwrap();
    assert!(begun.elapsed() < Duration::from_secs(2), "drain took {:?}", begun.elapsed());

    assert_eq!(state_of(store.as_ref(), quick).await, None);
    assert_eq!(state_of(store.as_ref(), slow).await, Some(TaskState::Active));

    // No heartbeat after the abort, so the lease runs out.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.reclaim_expired_leases().await.unwrap(), 1);

    let info = store.task_info(slow).await.unwrap().unwrap();
    assert_eq!(info.state, TaskState::Pending);
    assert_eq!(info.retry_count, 0);
}
