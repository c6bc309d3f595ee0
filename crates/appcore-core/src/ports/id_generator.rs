//! IdGenerator port - アプリケーション ID の生成
//!
//! # 実装
//! - **SequentialIds**: プロセス全体のカウンタ（`a1`, `a2`, ...）。デフォルト
//! - **UlidGenerator**: `Clock` を使う時系列ソート可能な ULID

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::AppId;
use crate::ports::Clock;

/// IdGenerator はプロセス内で一意なアプリケーション ID を払い出す
pub trait IdGenerator {
    fn generate_app_id(&self) -> AppId;
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// プロセス内の全生成器で共有する連番
///
/// 別々の `SequentialIds` でも同じ ID は出さない。
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialIds;

impl IdGenerator for SequentialIds {
    fn generate_app_id(&self) -> AppId {
        AppId::from_sequence(NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }
}

/// UlidGenerator は Clock の現在時刻から ULID を作る
///
/// `FixedClock` ならタイムスタンプ部は決定的。一意性はランダム部で保つ。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_app_id(&self) -> AppId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        AppId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
