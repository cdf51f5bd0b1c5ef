//! HandlerRegistry - handler の登録と検索
//!
//! 登録はサーバー起動前に済ませ、`Arc<HandlerRegistry>` として凍結します。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{Handler, PayloadHandler, TypedHandler};
use super::payload::TaskPayload;
use crate::domain::TaskType;
use crate::error::{SpindleError, SpindleResult};

/// task_type -> handler
///
/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register("demo:echo", handler_fn(|_ctx, _payload| async { Ok(()) }))?;
/// registry.register_typed::<Welcome, _>(WelcomeHandler)?;
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: Handler + 'static>(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: H,
    ) -> SpindleResult<()> {
        let task_type = task_type.into();
        if task_type.as_str().is_empty() {
            return Err(SpindleError::InvalidOption("task type must not be empty".into()));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(SpindleError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, Arc::new(handler));
        Ok(())
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_typed<T: TaskPayload, H: PayloadHandler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> SpindleResult<()> {
        self.register(T::TYPE, TypedHandler::<T, H>::new(handler))
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Like `get`, but a missing handler is `HandlerNotFound`.
    pub fn resolve(&self, task_type: &TaskType) -> SpindleResult<Arc<dyn Handler>> {
        self.get(task_type)
            .ok_or_else(|| SpindleError::HandlerNotFound(task_type.clone()))
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
