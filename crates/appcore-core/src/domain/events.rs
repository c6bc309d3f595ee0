//! Events - アプリケーションがリスナーに通知するイベント

use std::fmt;
use std::str::FromStr;

use super::errors::{AppError, Failure};
use super::phase::Phase;
use crate::app::Application;

/// リスナーに届くイベント
#[derive(Clone)]
pub enum Event {
    /// `Phase` に入った。`state:<phase>` と `state` の両方のリスナーに届く
    State(Phase),

    /// error channel で失敗が報告された
    Error(Failure),

    /// `parent` にマウントされた
    Mount { parent: Application },
}

impl Event {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Event::State(phase) => Some(*phase),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::State(phase) => f.debug_tuple("State").field(phase).finish(),
            Event::Error(failure) => f.debug_tuple("Error").field(failure).finish(),
            Event::Mount { parent } => f
                .debug_struct("Mount")
                .field("parent", &parent.fullname())
                .finish(),
        }
    }
}

/// リスナーの購読キー
///
/// 文字列表現: `state`, `state:<phase>`, `error`, `mount`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// すべてのフェーズ変化
    State,

    /// 特定のフェーズへの遷移
    StateAt(Phase),

    Error,

    Mount,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::State => f.write_str("state"),
            EventKind::StateAt(phase) => write!(f, "state:{phase}"),
            EventKind::Error => f.write_str("error"),
            EventKind::Mount => f.write_str("mount"),
        }
    }
}

impl FromStr for EventKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(EventKind::State),
            "error" => Ok(EventKind::Error),
            "mount" => Ok(EventKind::Mount),
            _ => match s.strip_prefix("state:") {
                Some(phase) => Ok(EventKind::StateAt(phase.parse()?)),
                None => Err(AppError::UnknownEvent(s.to_string())),
            },
        }
    }
}
