//! Domain - ドメインモデル（phase, ids, errors, events, options）

pub mod errors;
pub mod events;
pub mod ids;
pub mod options;
pub mod phase;

pub use self::errors::{AppError, Failure, HookResult};
pub use self::events::{Event, EventKind};
pub use self::ids::AppId;
pub use self::options::{KeyPath, MergeMode};
pub use self::phase::Phase;
