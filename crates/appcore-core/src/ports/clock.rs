//! Clock port - 時刻の抽象化
//!
//! # 実装
//! - **SystemClock**: 実時間
//! - **FixedClock**: テスト用の固定時刻

use chrono::{DateTime, Utc};

/// Clock は現在時刻を提供する
///
/// 差し替え可能にしておくことで、テストで構築時刻や ULID を決定的にできる。
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// 実時間の Clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 常に同じ時刻を返す
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
