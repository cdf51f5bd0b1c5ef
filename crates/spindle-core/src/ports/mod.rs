//! Ports - 抽象化レイヤー
//!
//! 外部システム（Redis など）と時刻・ID 生成へのインターフェースです。
//! 実装は `impls` にあります。

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ArchiveRetention, ClaimedTask, Lease, QueueStats, TaskStore};
