//! Status - アプリケーションツリーのある時点のビュー
//!
//! ツリーが止まっている理由を説明する（どのアプリケーションが遅れているか、
//! いくつの hold を待っているか、何が失敗したか）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AppId, Phase};

use super::Application;

/// AppStatus は 1 つのアプリケーションと、再帰的にその子を表す
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub id: AppId,
    pub name: String,
    pub fullname: String,
    pub phase: Option<Phase>,
    pub errors: Vec<String>,
    pub pending_holds: usize,
    pub waiting_hooks: usize,
    pub created_at: DateTime<Utc>,
    pub children: Vec<AppStatus>,
}

impl AppStatus {
    /// 終端フェーズに達していないアプリケーション（深さ優先）
    pub fn unsettled(&self) -> Vec<&AppStatus> {
        let mut found = Vec::new();
        self.collect_unsettled(&mut found);
        found
    }

    fn collect_unsettled<'a>(&'a self, found: &mut Vec<&'a AppStatus>) {
        if !self.phase.is_some_and(Phase::is_terminal) {
            found.push(self);
        }
        for child in &self.children {
            child.collect_unsettled(found);
        }
    }
}

impl Application {
    pub fn status(&self) -> AppStatus {
        AppStatus {
            id: self.id().clone(),
            name: self.name().to_string(),
            fullname: self.fullname(),
            phase: self.phase(),
            errors: self.errors().iter().map(ToString::to_string).collect(),
            pending_holds: self.pending_holds(),
            waiting_hooks: self.inner.machine.borrow().waiting(),
            created_at: self.created_at(),
            children: self.children().iter().map(Application::status).collect(),
        }
    }
}
