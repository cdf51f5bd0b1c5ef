//! Typed - handler と型付き payload
//!
//! task_type の typo を型で排除し、handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `PayloadHandler<T>` trait - 型安全
//! - **内部（bytes）**: `Handler` trait - object-safe, type erasure

pub mod codec;
pub mod context;
pub mod handler;
pub mod payload;
pub mod registry;

pub use self::codec::PayloadCodec;
pub use self::context::TaskContext;
pub use self::handler::{FnHandler, Handler, PayloadHandler, TypedHandler, handler_fn};
pub use self::payload::TaskPayload;
pub use self::registry::HandlerRegistry;
