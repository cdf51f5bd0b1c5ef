//! spindle-core
//!
//! Redis をバックエンドとする分散タスクキューのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, queue, options）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（client, server, scheduler, builder など）
//! - **typed**: 型付き Task API（TaskPayload, Handler, HandlerRegistry, PayloadCodec）
//! - **impls**: TaskStore 実装（in-memory、`redis` feature で Redis）
//! - **config / telemetry**: 設定の読み込みと tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod telemetry;
pub mod typed;

pub use app::{App, AppBuilder, Client, ScheduleSpec, Scheduler, Server, ServerConfig};
pub use config::{ConfigError, SpindleConfig};
pub use domain::{EnqueueOptions, QueueName, QueueWeights, Task, TaskId, TaskInfo, TaskState, TaskType};
pub use error::{SpindleError, SpindleResult};
pub use ports::TaskStore;
pub use typed::{Handler, HandlerRegistry, PayloadHandler, TaskContext, TaskPayload, handler_fn};
