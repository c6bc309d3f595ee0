//! App - アプリケーションのファサード
//!
//! [`Application`] はライフサイクルの部品を 1 つのアドレス可能な単位にまとめる:
//!
//! - **WaitGate** (`gate`): いつ進むかを決めるカウントダウンラッチ
//! - **PhaseMachine** (`machine`): 現在のフェーズとフェーズごとの hook キュー
//! - **ConfigStore** (`config`): 自分のオプションツリー。祖先を通して解決する
//! - **ErrorQueue** (`error_channel`): 報告された失敗。FAIL を引き起こす
//! - **Plugins** (`plugin`): マウントするコールバックと入れ子のアプリケーション
//! - **EventBus** (`events`): `state`, `state:<phase>`, `error`, `mount`
//!
//! # スレッドモデル
//! すべてシングルスレッド。`Application` は安価な `Rc` ハンドルで、
//! hook とリスナーは起動したスレッド上で同期的に実行される。
//! 遅延処理は注入した [`Scheduler`] を通す。

pub mod builder;
pub mod config;
pub mod error_channel;
pub mod events;
pub mod gate;
pub mod machine;
pub mod plugin;
pub mod status;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{AppId, Failure, Phase};
use crate::ports::{Scheduler, Supervisor};

pub use self::builder::{AppBuilder, AppFactory};
pub use self::config::ConfigStore;
pub use self::error_channel::ErrorQueue;
pub use self::events::{EventBus, ListenerId};
pub use self::gate::{Release, WaitGate};
pub use self::machine::PhaseMachine;
pub use self::plugin::{ChildFailurePolicy, Plugin, PluginRegistry};
pub use self::status::AppStatus;

/// [`Application::fullname`] の区切り文字
pub const NAME_SEPARATOR: &str = ":";

/// アプリケーションへのハンドル
///
/// clone は同じアプリケーションを指す。同じインスタンスを指すハンドル同士が等しい。
#[derive(Clone)]
pub struct Application {
    inner: Rc<AppInner>,
}

struct AppInner {
    id: AppId,
    name: String,
    created_at: DateTime<Utc>,

    /// マウント時に 1 回だけ設定。参照用のみ
    parent: RefCell<Option<Weak<AppInner>>>,

    config: RefCell<ConfigStore>,
    /// 組み込みデフォルト。すべての参照の最後の層
    defaults: Rc<Value>,

    machine: RefCell<PhaseMachine>,
    errors: RefCell<ErrorQueue>,
    events: RefCell<EventBus>,
    plugins: RefCell<PluginRegistry>,
    gate: WaitGate,

    scheduler: Rc<dyn Scheduler>,
    supervisor: Rc<dyn Supervisor>,
    child_failure: ChildFailurePolicy,
}

impl Application {
    /// すべての能力がデフォルトの builder
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// デフォルトの能力を持つ無名のアプリケーション。名前は ID になる
    ///
    /// [`crate::impls::TokioLocalScheduler`] を使うので、tokio の `LocalSet` 内で呼ぶこと。
    pub fn new() -> Result<Self, crate::domain::AppError> {
        AppBuilder::new().build()
    }

    /// デフォルトの能力を持つ名前付きアプリケーション
    pub fn named(name: impl Into<String>) -> Result<Self, crate::domain::AppError> {
        AppBuilder::new().name(name).build()
    }

    pub fn id(&self) -> &AppId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 祖先チェーンで修飾した名前: `root:child:grandchild`
    ///
    /// 呼ぶたびに計算する。
    pub fn fullname(&self) -> String {
        let mut names = vec![self.name().to_string()];
        let mut ancestor = self.parent();
        while let Some(app) = ancestor {
            names.push(app.name().to_string());
            ancestor = app.parent();
        }
        names.reverse();
        names.join(NAME_SEPARATOR)
    }

    /// マウント先のアプリケーション（まだ生きていれば）
    pub fn parent(&self) -> Option<Application> {
        self.inner
            .parent
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Application { inner })
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.borrow().is_none()
    }

    /// 祖先（近い順）
    pub fn ancestors(&self) -> Vec<Application> {
        let mut chain = Vec::new();
        let mut ancestor = self.parent();
        while let Some(app) = ancestor {
            ancestor = app.parent();
            chain.push(app);
        }
        chain
    }

    /// 現在のフェーズ。`None` になるのは構築中だけ
    pub fn phase(&self) -> Option<Phase> {
        self.inner.machine.borrow().current()
    }

    pub fn is_failed(&self) -> bool {
        self.phase().is_some_and(Phase::is_fail)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// これまでに報告された失敗（順序どおり、重複なし）
    pub fn errors(&self) -> Vec<Failure> {
        self.inner.errors.borrow().to_vec()
    }

    /// 現在のフェーズ遷移に hold を取る
    ///
    /// すべての hold が解放されるまで進まない。最後の解放は `release()` の中で
    /// 同期的にフェーズを進める。
    pub fn wait(&self) -> Release {
        self.inner.gate.wait()
    }

    /// 現在の遷移で未解放の hold 数
    pub fn pending_holds(&self) -> usize {
        self.inner.gate.pending()
    }

    /// `other` が同じアプリケーションか
    pub fn ptr_eq(&self, other: &Application) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn downgrade(&self) -> Weak<AppInner> {
        Rc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<AppInner>) -> Option<Application> {
        weak.upgrade().map(|inner| Application { inner })
    }
}

impl PartialEq for Application {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Application {}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("id", &self.inner.id)
            .field("fullname", &self.fullname())
            .field("phase", &self.phase())
            .field("gate", &self.inner.gate)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing;
    use super::*;
    use crate::impls::TickQueue;

    #[test]
    fn constructs_application_with_name() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "myapp");

        assert_eq!(app.name(), "myapp");
        assert!(!app.id().as_str().is_empty());
        assert!(app.is_root());
        assert_eq!(app.fullname(), "myapp");
    }

    #[test]
    fn name_defaults_to_id() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::builder(&ticks).build().unwrap();
        assert_eq!(app.name(), app.id().as_str());
    }

    #[test]
    fn ids_are_unique() {
        let ticks = Rc::new(TickQueue::new());
        let a = testing::app(&ticks, "a");
        let b = testing::app(&ticks, "b");
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn fullname_follows_parent_chain() {
        let ticks = Rc::new(TickQueue::new());
        let root = testing::app(&ticks, "root");
        let child = testing::app(&ticks, "child");
        let grandchild = testing::app(&ticks, "leaf");

        child.use_plugin(&grandchild).unwrap();
        assert_eq!(grandchild.fullname(), "child:leaf");

        root.use_plugin(&child).unwrap();
        assert_eq!(grandchild.fullname(), "root:child:leaf");
        assert_eq!(grandchild.ancestors(), vec![child.clone(), root.clone()]);
        assert!(!grandchild.is_root());
        assert_eq!(grandchild.parent(), Some(child));
    }

    #[test]
    fn enters_preboot_before_construction_returns() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        assert_eq!(app.phase(), Some(Phase::Preboot));
        assert_eq!(app.pending_holds(), 1);
        assert!(format!("{app:?}").contains("Some(Preboot)"));
    }
}
