//! Errors - 構造エラーと報告された失敗
//!
//! アプリケーションを流れるエラーは 2 種類:
//! - [`AppError`]: 呼び出し側のミスとして同期的に返すもの（`InvalidState`,
//!   `InvalidPlugin`, `InvalidOption` など）と、ライフサイクルが error channel
//!   経由で失敗を流すときのラッパー
//! - [`Failure`]: `Application::error` で報告される任意のエラー値。
//!   参照カウントなので error queue は同一性で重複排除できる

use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

/// AppError はライフサイクルエンジンのエラー型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid state '{0}'.")]
    InvalidState(String),

    #[error("Expecting function or application for plugin: {0}")]
    InvalidPlugin(String),

    #[error("invalid option at '{path}': {reason}")]
    InvalidOption { path: String, reason: String },

    #[error("option at '{path}' has an unexpected shape: {source}")]
    OptionType {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("plugin failed: {0}")]
    Plugin(Failure),

    #[error("mounted application '{0}' failed")]
    ChildFailed(String),

    #[error("unhandled error: {0}")]
    Unhandled(Failure),
}

impl AppError {
    pub(crate) fn invalid_option(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        AppError::InvalidOption {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure は報告された実行時エラー
///
/// clone は中身のエラーを共有する。2 つの failure が「同じ」なのは
/// 中身を共有しているときだけ（[`Failure::ptr_eq`]）。
///
/// # 注意
/// `Failure` 自身は `std::error::Error` を実装しない。
/// `From<E: Error>` で全エラー型を受け、hook 内で `?` を使えるようにするため。
#[derive(Clone)]
pub struct Failure {
    inner: Rc<dyn StdError + 'static>,
}

/// ライフサイクル hook / イベントリスナーの戻り値
pub type HookResult = Result<(), Failure>;

impl Failure {
    pub fn new<E: StdError + 'static>(error: E) -> Self {
        Self {
            inner: Rc::new(error),
        }
    }

    /// メッセージだけを持つ Failure
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub fn ptr_eq(&self, other: &Failure) -> bool {
        // データポインタのみ比較（vtable は codegen unit ごとに異なりうる）
        std::ptr::addr_eq(Rc::as_ptr(&self.inner), Rc::as_ptr(&other.inner))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl<E: StdError + 'static> From<E> for Failure {
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.inner.to_string()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let failure = Failure::msg("boom");
        let copy = failure.clone();
        let other = Failure::msg("boom");

        assert!(failure.ptr_eq(&copy));
        assert!(!failure.ptr_eq(&other));
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn wraps_any_error_type() {
        fn parse(input: &str) -> Result<i32, Failure> {
            Ok(input.parse::<i32>()?)
        }

        let failure = parse("nope").unwrap_err();
        assert!(failure.downcast_ref::<std::num::ParseIntError>().is_some());
    }

    #[test]
    fn app_errors_render_messages() {
        let err = AppError::InvalidState("bogus".into());
        assert_eq!(err.to_string(), "Invalid state 'bogus'.");

        let err = AppError::Plugin(Failure::msg("hook exploded"));
        assert_eq!(err.to_string(), "plugin failed: hook exploded");
    }
}
