//! appcore-core
//!
//! Hierarchical application lifecycle engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（phase, ids, errors, events, options）
//! - **ports**: 注入する能力（Scheduler, Supervisor, Clock, IdGenerator）
//! - **impls**: Scheduler の実装（TickQueue, TokioLocalScheduler）
//! - **app**: `Application` ハンドルとライフサイクルの部品
//!
//! # 使用例
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let app = Application::named("api")?;
//!     app.set("port", json!(8080))?;
//!     app.startup(|app| {
//!         let ready = app.wait();
//!         tokio::task::spawn_local(async move { /* warm caches */ ready.release() });
//!         Ok(())
//!     });
//!     app.running(|app| { tracing::info!(port = %app.get("port"), "serving"); Ok(()) });
//!     Ok::<_, AppError>(())
//! }).await?;
//! ```

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{AppBuilder, AppFactory, AppStatus, Application, ChildFailurePolicy, Plugin, Release};
pub use domain::{AppError, Event, EventKind, Failure, HookResult, Phase};
