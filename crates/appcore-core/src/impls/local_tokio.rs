//! TokioLocalScheduler - 現在の tokio `LocalSet` に遅延実行する

use crate::ports::{Scheduler, Task};

/// 遅延タスクをそれぞれ tokio のローカルタスクとして spawn する
///
/// アプリケーションは `!Send` なので `LocalSet` 上で動かす必要がある。
/// `LocalSet` の外で `defer` すると tokio 内で panic する。
///
/// # 使用例
/// ```ignore
/// let local = tokio::task::LocalSet::new();
/// local.run_until(async {
///     let app = Application::named("root")?;
///     // ...
/// }).await;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocalScheduler;

impl Scheduler for TokioLocalScheduler {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}
