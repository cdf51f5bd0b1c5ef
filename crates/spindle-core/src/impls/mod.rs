//! Impls - TaskStore の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・デモ用（プロセス内、非永続）
//! - **RedisTaskStore**: 本番用（`redis` feature）

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::InMemoryTaskStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisStoreConfig, RedisTaskStore};
