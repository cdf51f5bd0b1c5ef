//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ワイヤリングと順序付き shutdown
//! - **Client**: envelope の組み立てと投入
//! - **Server**: 重み付き dispatch、retry / archive、graceful shutdown
//! - **Scheduler**: 周期タスク（`@every`、cron）
//! - **PromoterLoop**: scheduled / retry → pending
//! - **ReaperLoop**: Lease 期限切れの回収

pub mod builder;
pub mod client;
pub mod promoter_loop;
pub mod reaper_loop;
pub mod retry;
pub mod schedule_spec;
pub mod scheduler;
pub mod selector;
pub mod server;

pub use self::builder::{App, AppBuilder, BuildError, shutdown_signal};
pub use self::client::Client;
pub use self::promoter_loop::PromoterLoop;
pub use self::reaper_loop::ReaperLoop;
pub use self::retry::RetryPolicy;
pub use self::schedule_spec::ScheduleSpec;
pub use self::scheduler::{EntryInfo, ScheduleEntry, Scheduler, SchedulerConfig};
pub use self::selector::QueueSelector;
pub use self::server::{Server, ServerConfig};
