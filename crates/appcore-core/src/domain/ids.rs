//! IDs - アプリケーション識別子
//!
//! `AppId` は不透明な値。デフォルトの生成器は短い連番（`a1`, `a2`, ...）、
//! ULID 生成器はソート可能な ID（`app-<ulid>`）を払い出す。
//! [`crate::ports::IdGenerator`] を参照。

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// プロセス内で一意なアプリケーション ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    /// `a` プレフィックス付きの連番 ID
    pub fn from_sequence(value: u64) -> Self {
        Self(format!("a{value}"))
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("app-{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Ulid> for AppId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}
