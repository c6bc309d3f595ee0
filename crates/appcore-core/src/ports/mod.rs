//! Ports - アプリケーションに注入する外部能力
//!
//! 各 trait は、ライフサイクルが必要とするが自分では持たないものを隠す
//! （イベントループ、プロセス、時刻、ID 採番）。

pub mod clock;
pub mod id_generator;
pub mod scheduler;
pub mod supervisor;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, SequentialIds, UlidGenerator};
pub use self::scheduler::{Scheduler, Task};
pub use self::supervisor::{LogSupervisor, Supervisor};
