//! Scheduler port - 遅延実行（"next tick"）
//!
//! ライフサイクルは、フェーズを通知した遷移の中で同期的に次へ進まない。
//! 自分の gate hold の解放をイベントループの後のターンに遅延させ、
//! 現フェーズの hook が先に hold を取れるようにする。
//!
//! # 実装
//! - **TickQueue**: 呼び出し側が進める手動 FIFO（テスト・組み込み用）
//! - **TokioLocalScheduler**: `tokio::task::spawn_local`

/// 遅延実行する処理の単位
pub type Task = Box<dyn FnOnce()>;

/// Scheduler はタスクをイベントループの後のターンで実行する
///
/// # 契約
/// - `defer` は戻る前に `task` を実行しない
/// - 同じターンで遅延されたタスクは登録順に実行する
pub trait Scheduler {
    fn defer(&self, task: Task);
}
