//! Supervisor port - プロセスの管理者
//!
//! ルートが失敗したらプロセスを落としたい場合があり、誰も聞いていない失敗も
//! 消えてはいけない。どちらの判断もエンジンを組み込む側のものなので、ここで注入する。

use crate::app::Application;
use crate::domain::Failure;

/// Supervisor はライフサイクルが他に渡せない失敗を受け取る
pub trait Supervisor {
    /// `error` リスナーがない状態で error channel に失敗が流れた
    fn unhandled(&self, app: &Application, failure: &Failure);

    /// 親を持たないアプリケーションが `Phase::Fail` に入った
    ///
    /// アプリケーションごとに高々 1 回
    fn root_failed(&self, app: &Application);
}

/// デフォルトの Supervisor: ログに出すだけでプロセスには触らない
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSupervisor;

impl Supervisor for LogSupervisor {
    fn unhandled(&self, app: &Application, failure: &Failure) {
        tracing::error!(app = %app.fullname(), error = %failure, "unhandled application error");
    }

    fn root_failed(&self, app: &Application) {
        tracing::error!(
            app = %app.fullname(),
            errors = app.errors().len(),
            "root application failed"
        );
    }
}
