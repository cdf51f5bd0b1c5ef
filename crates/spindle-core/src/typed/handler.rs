//! Handler trait - task を処理する handler の定義
//!
//! # 二層構造
//! - **内部（bytes）**: `Handler` - object-safe、registry が `Arc<dyn Handler>` で保持
//! - **表層（typed）**: `PayloadHandler<T>` - `TypedHandler<T, H>` で `Handler` に変換
//!
//! クロージャは `handler_fn` で `Handler` にできます。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::context::TaskContext;
use super::payload::TaskPayload;
use crate::error::SpindleResult;

/// Handler は payload bytes を処理する
///
/// `Err` は retry（`SkipRetry` / `HandlerNotFound` は archive）。
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(&self, ctx: TaskContext, payload: &[u8]) -> SpindleResult<()>;
}

/// PayloadHandler は decode 済みの型付き payload を処理する
///
/// # 使用例
/// ```ignore
/// struct WelcomeHandler;
///
/// #[async_trait]
/// impl PayloadHandler<Welcome> for WelcomeHandler {
///     async fn handle(&self, _ctx: TaskContext, task: Welcome) -> SpindleResult<()> {
///         tracing::info!(user_id = task.user_id, "welcome");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PayloadHandler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, ctx: TaskContext, payload: T) -> SpindleResult<()>;
}

/// `PayloadHandler<T>` を bytes の `Handler` に変換する（型消去）
pub struct TypedHandler<T: TaskPayload, H: PayloadHandler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: PayloadHandler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: PayloadHandler<T>> Handler for TypedHandler<T, H> {
    async fn process(&self, ctx: TaskContext, payload: &[u8]) -> SpindleResult<()> {
        let task: T = PayloadCodec::decode(payload)?;
        self.handler.handle(ctx, task).await
    }
}

/// Closure adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a `Handler`. The closure receives an owned copy of
/// the payload bytes.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = SpindleResult<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = SpindleResult<()>> + Send,
{
    async fn process(&self, ctx: TaskContext, payload: &[u8]) -> SpindleResult<()> {
        (self.f)(ctx, payload.to_vec()).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{QueueName, TaskId, TaskType};
    use crate::error::SpindleError;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;
    use ulid::Ulid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Ping {
        pub value: i32,
    }

    impl TaskPayload for Ping {
        const TYPE: &'static str = "test:ping";
    }

    pub struct PingHandler {
        pub seen: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PayloadHandler<Ping> for PingHandler {
        async fn handle(&self, _ctx: TaskContext, task: Ping) -> SpindleResult<()> {
            self.seen.fetch_add(task.value as u32, Ordering::SeqCst);
            Ok(())
        }
    }

    pub fn context(task_type: &str) -> TaskContext {
        TaskContext::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new(task_type),
            QueueName::default(),
            0,
            3,
            Utc::now(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let seen = Arc::new(AtomicU32::new(0));
        let handler = TypedHandler::<Ping, _>::new(PingHandler { seen: seen.clone() });

        handler
            .process(context(Ping::TYPE), br#"{"value": 7}"#)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_malformed_payload() {
        let handler = TypedHandler::<Ping, _>::new(PingHandler {
            seen: Arc::new(AtomicU32::new(0)),
        });

        let err = handler
            .process(context(Ping::TYPE), b"not json")
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::PayloadDecode(_)));
    }

    #[tokio::test]
    async fn test_closure_handler_sees_raw_bytes() {
        let handler = handler_fn(|ctx: TaskContext, payload: Vec<u8>| async move {
            assert_eq!(ctx.task_type().as_str(), "raw");
            if payload == b"\x00\xff" {
                Ok(())
            } else {
                Err(SpindleError::handler("unexpected bytes"))
            }
        });

        handler.process(context("raw"), b"\x00\xff").await.unwrap();
        assert!(handler.process(context("raw"), b"x").await.is_err());
    }
}
