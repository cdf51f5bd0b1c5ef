use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{QueueName, TaskId, TaskState};
use crate::error::{SpindleError, SpindleResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// What a producer hands to the client: a type tag and opaque bytes.
///
/// The envelope (id, queue, retry budget) is only built at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    task_type: TaskType,
    payload: Vec<u8>,
}

impl Task {
    pub fn new(task_type: impl Into<TaskType>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
        }
    }

    /// Serialize `value` as JSON into the payload.
    pub fn json<T: Serialize>(task_type: impl Into<TaskType>, value: &T) -> SpindleResult<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| SpindleError::InvalidOption(format!("payload encode: {e}")))?;
        Ok(Self::new(task_type, payload))
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (TaskType, Vec<u8>) {
        (self.task_type, self.payload)
    }
}

/// Immutable unit of work as stored and delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    id: TaskId,
    task_type: TaskType,
    payload: Vec<u8>,
    queue: QueueName,
    max_retry: u32,
    #[serde(with = "duration_ms")]
    timeout: Duration,
    enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: Vec<u8>,
        queue: QueueName,
        max_retry: u32,
        timeout: Duration,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload,
            queue,
            max_retry,
            timeout,
            enqueued_at,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// Read-only snapshot of a task: envelope plus store-owned state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub envelope: TaskEnvelope,
    pub state: TaskState,
    pub process_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

impl TaskInfo {
    pub fn id(&self) -> TaskId {
        self.envelope.id()
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
