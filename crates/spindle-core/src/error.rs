use thiserror::Error;

use crate::domain::{TaskId, TaskType};

pub type SpindleResult<T> = Result<T, SpindleError>;

#[derive(Debug, Error)]
pub enum SpindleError {
    /// Backing store could not be reached. Callers retry with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("payload decode failed: {0}")]
    PayloadDecode(String),

    /// Handler asked for the task to be archived without further retries.
    #[error("skip retry: {0}")]
    SkipRetry(String),

    #[error("{0}")]
    Handler(String),

    #[error("invalid schedule spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("invalid enqueue option: {0}")]
    InvalidOption(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The lease presented no longer owns the task (expired and reclaimed).
    #[error("lease lost for {0}")]
    LeaseLost(TaskId),

    #[error("handler exceeded its deadline")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),
}

impl SpindleError {
    /// Construct a generic handler failure.
    pub fn handler(msg: impl Into<String>) -> Self {
        SpindleError::Handler(msg.into())
    }

    pub fn skip_retry(msg: impl Into<String>) -> Self {
        SpindleError::SkipRetry(msg.into())
    }

    /// Retried locally by the component that issued the store call.
    pub fn is_transient(&self) -> bool {
        matches!(self, SpindleError::StoreUnavailable(_))
    }

    /// Archive immediately, no retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SpindleError::HandlerNotFound(_) | SpindleError::SkipRetry(_)
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for SpindleError {
    fn from(err: redis::RedisError) -> Self {
        SpindleError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SpindleError::StoreUnavailable("down".into()).is_transient());
        assert!(SpindleError::HandlerNotFound(TaskType::new("x")).is_permanent());
        assert!(SpindleError::skip_retry("bad input").is_permanent());

        let decode = SpindleError::PayloadDecode("eof".into());
        assert!(!decode.is_permanent());
        assert!(!decode.is_transient());
    }

    #[test]
    fn messages_name_the_task_type() {
        let err = SpindleError::HandlerNotFound(TaskType::new("email:send"));
        assert!(err.to_string().contains("email:send"));
    }
}
