//! Impls - Scheduler の実装
//!
//! # 含まれる実装
//! - **TickQueue**: 決定的。手動で進める
//! - **TokioLocalScheduler**: デフォルト。tokio の `LocalSet` 上で動く

pub mod local_tokio;
pub mod tick_queue;

pub use self::local_tokio::TokioLocalScheduler;
pub use self::tick_queue::TickQueue;
