//! Phase - アプリケーションのライフサイクルフェーズ

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::AppError;

/// Phase はアプリケーション起動シーケンスの段階
///
/// # 状態遷移
/// - Preboot -> Startup -> Ready -> Running（昇順の成功パス）
/// - Running より前の任意のフェーズ -> Fail（吸収状態）
///
/// # 注意
/// `Fail` は昇順に含まれないため `Ord` は実装しない。
/// フェーズの比較には [`Phase::is_reached_by`] を使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// 報告されたエラーにより成功パスから外れた
    Fail,

    /// 構築中に同期的に入る
    Preboot,

    /// プラグインはここで実行される
    Startup,

    /// すべてのプラグインが起動処理を終えた
    Ready,

    /// 成功の終端フェーズ
    Running,
}

impl Phase {
    /// 昇順の成功パス
    pub const SEQUENCE: [Phase; 4] = [Phase::Preboot, Phase::Startup, Phase::Ready, Phase::Running];

    /// すべてのアプリケーションが最初に入るフェーズ
    pub const BEGIN: Phase = Phase::Preboot;

    /// 成功パスの最後のフェーズ
    pub const END: Phase = Phase::Running;

    /// 順序付け用の位置。`Fail` は 0、成功パスは 1 から
    pub fn rank(self) -> usize {
        match self {
            Phase::Fail => 0,
            Phase::Preboot => 1,
            Phase::Startup => 2,
            Phase::Ready => 3,
            Phase::Running => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Fail => "fail",
            Phase::Preboot => "preboot",
            Phase::Startup => "startup",
            Phase::Ready => "ready",
            Phase::Running => "running",
        }
    }

    /// 吸収状態のエラーフェーズか
    pub fn is_fail(self) -> bool {
        matches!(self, Phase::Fail)
    }

    /// このフェーズからはもう遷移しない
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Fail | Phase::Running)
    }

    /// 成功パス上で `self` の次のフェーズ
    ///
    /// `Running` と `Fail` では `None`
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Preboot => Some(Phase::Startup),
            Phase::Startup => Some(Phase::Ready),
            Phase::Ready => Some(Phase::Running),
            Phase::Running | Phase::Fail => None,
        }
    }

    /// `current` の次のフェーズ（`None` は未開始）
    pub fn after(current: Option<Phase>) -> Option<Phase> {
        match current {
            None => Some(Phase::BEGIN),
            Some(phase) => phase.next(),
        }
    }

    /// `current` にいるアプリケーションが `self` に到達（または通過）したか
    ///
    /// `Fail` に到達するのは `Fail` のみ。成功フェーズは rank で比較し、
    /// `Fail` からは到達しない
    pub fn is_reached_by(self, current: Option<Phase>) -> bool {
        match (self, current) {
            (_, None) => false,
            (Phase::Fail, Some(current)) => current.is_fail(),
            (_, Some(Phase::Fail)) => false,
            (target, Some(current)) => current.rank() >= target.rank(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Phase::Fail),
            "preboot" => Ok(Phase::Preboot),
            "startup" => Ok(Phase::Startup),
            "ready" => Ok(Phase::Ready),
            "running" => Ok(Phase::Running),
            _ => Err(AppError::InvalidState(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fail("fail", Phase::Fail)]
    #[case::preboot("preboot", Phase::Preboot)]
    #[case::startup("STARTUP", Phase::Startup)]
    #[case::ready(" ready ", Phase::Ready)]
    #[case::running("Running", Phase::Running)]
    fn parses_phase_names(#[case] name: &str, #[case] expected: Phase) {
        assert_eq!(name.parse::<Phase>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_phase_names() {
        let err = "notastate".parse::<Phase>().unwrap_err();
        assert!(matches!(err, AppError::InvalidState(name) if name == "notastate"));
    }

    #[test]
    fn sequence_follows_next() {
        let mut walked = vec![Phase::BEGIN];
        while let Some(next) = walked.last().and_then(|p| p.next()) {
            walked.push(next);
        }
        assert_eq!(walked, Phase::SEQUENCE.to_vec());
        assert_eq!(Phase::after(None), Some(Phase::Preboot));
        assert_eq!(Phase::after(Some(Phase::Fail)), None);
    }

    #[rstest]
    #[case::same(Phase::Ready, Some(Phase::Ready), true)]
    #[case::passed(Phase::Startup, Some(Phase::Running), true)]
    #[case::behind(Phase::Running, Some(Phase::Ready), false)]
    #[case::not_started(Phase::Preboot, None, false)]
    #[case::fail_reaches_fail(Phase::Fail, Some(Phase::Fail), true)]
    #[case::success_never_reaches_fail(Phase::Fail, Some(Phase::Running), false)]
    #[case::fail_never_reaches_success(Phase::Preboot, Some(Phase::Fail), false)]
    fn reached_comparison(#[case] target: Phase, #[case] current: Option<Phase>, #[case] reached: bool) {
        assert_eq!(target.is_reached_by(current), reached);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Phase::Ready).unwrap(), "\"ready\"");
        assert_eq!(Phase::Startup.to_string(), "startup");
    }
}
