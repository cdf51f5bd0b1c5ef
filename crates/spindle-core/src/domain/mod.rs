//! Domain model (ids, task envelope, state, queues, enqueue options).

pub mod ids;
pub mod options;
pub mod queue;
pub mod state;
pub mod task;

pub use ids::{EntryId, LeaseId, TaskId};
pub use options::{DEFAULT_MAX_RETRY, DEFAULT_TIMEOUT, EnqueueOptions};
pub use queue::{DEFAULT_QUEUE, QueueName, QueueWeights};
pub use state::TaskState;
pub use task::{Task, TaskEnvelope, TaskInfo, TaskType};
