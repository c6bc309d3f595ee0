//! ErrorChannel - アプリケーションに報告された失敗
//!
//! 失敗は次のフェーズ境界までここに溜まる。境界でキューが空でなければ
//! `Phase::Fail` に遷移する（すでに running なら遷移しない）。

use crate::domain::{AppError, Event, EventKind, Failure};

use super::Application;

/// 追記専用の失敗リスト。同一性で重複排除する
#[derive(Debug, Default)]
pub struct ErrorQueue {
    failures: Vec<Failure>,
}

impl ErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同じ failure がまだなければ `failure` を追加
    ///
    /// 追加したかどうかを返す。
    pub fn push(&mut self, failure: Failure) -> bool {
        if self.contains(&failure) {
            return false;
        }
        self.failures.push(failure);
        true
    }

    pub fn contains(&self, failure: &Failure) -> bool {
        self.failures.iter().any(|known| known.ptr_eq(failure))
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter()
    }

    pub fn to_vec(&self) -> Vec<Failure> {
        self.failures.clone()
    }
}

impl Application {
    /// 失敗を報告する
    ///
    /// failure はキューに入り（同一性ごとに 1 回）、`error` イベントとして通知される。
    /// running より前なら、次のフェーズ遷移は FAIL になる。
    ///
    /// # Errors
    /// `error` リスナーがなくてもキューには入る。見落とされないよう
    /// `AppError::Unhandled` として返す。
    pub fn error(&self, failure: impl Into<Failure>) -> Result<&Self, AppError> {
        let failure = failure.into();
        if self.inner.errors.borrow_mut().push(failure.clone()) {
            tracing::debug!(app = %self.fullname(), error = %failure, "error reported");
        }

        if !self.has_listeners(EventKind::Error) {
            return Err(AppError::Unhandled(failure));
        }

        self.emit(EventKind::Error, &Event::Error(failure));
        Ok(self)
    }

    /// ライフサイクル自身が起こした失敗（hook、リスナー、マウントした子）を流す
    ///
    /// ここでは `Err` を受け取る相手がいないので、未処理の失敗は supervisor に渡す。
    pub(crate) fn report(&self, failure: Failure) {
        if let Err(AppError::Unhandled(failure)) = self.error(failure) {
            self.inner.supervisor.unhandled(self, &failure);
        }
    }

    /// hook やリスナーが返したエラーを流す
    ///
    /// `error()` がキューに入れて `Unhandled` として返した failure は再度キューに入れず、
    /// supervisor に 1 回だけ渡す。
    pub(crate) fn report_plugin_failure(&self, failure: Failure) {
        if let Some(AppError::Unhandled(reported)) = failure.downcast_ref::<AppError>() {
            if self.inner.errors.borrow().contains(reported) {
                self.inner.supervisor.unhandled(self, reported);
                return;
            }
        }
        self.report(Failure::new(AppError::Plugin(failure)));
    }
}
