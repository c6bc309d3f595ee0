//! Plugins - マウントするコールバックと入れ子のアプリケーション
//!
//! # プラグインの種類
//! - **Hook**: ホストが `Phase::Startup` に達したら 1 回実行するコールバック
//! - **App**: 既存のアプリケーション。ホストの子としてマウントする
//! - **Factory**: [`AppFactory`] とオプション。ホストの scheduler と supervisor で
//!   子を構築し、`App` と同じようにマウントする
//!
//! # 状態の同期
//! マウントされた子は常にホストより先を行く。ホストはフェーズ P にいる間、
//! 子が P を越えるまで自分の gate を hold する。そのためホストが RUNNING に
//! 達するのは子の後。失敗した子はホストをブロックしなくなり、ホストも
//! 失敗させるかどうかは [`ChildFailurePolicy`] で決める。

use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::domain::{AppError, Event, EventKind, Failure, HookResult, Phase};

use super::{AppFactory, AppInner, Application, Release};

/// マウントした子が FAIL に入ったときのホストの振る舞い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChildFailurePolicy {
    /// 子を待つのをやめ、ホストはそのまま進む
    #[default]
    Release,

    /// 待つのをやめ、ホストに `AppError::ChildFailed` を報告する
    Propagate,
}

/// [`Application::use_plugin`] でマウントできるもの
///
/// 同一性は参照で判定する。clone は同じプラグインとして扱う。
#[derive(Clone)]
pub enum Plugin {
    Hook(Rc<dyn Fn(&Application) -> HookResult>),
    App(Application),
    Factory(AppFactory, Value),
}

impl Plugin {
    pub fn hook(hook: impl Fn(&Application) -> HookResult + 'static) -> Self {
        Plugin::Hook(Rc::new(hook))
    }

    pub fn factory(factory: &AppFactory, options: Value) -> Self {
        Plugin::Factory(factory.clone(), options)
    }

    /// `other` が同じプラグイン参照か
    pub fn same_as(&self, other: &Plugin) -> bool {
        match (self, other) {
            (Plugin::Hook(a), Plugin::Hook(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (Plugin::App(a), Plugin::App(b)) => a.ptr_eq(b),
            (Plugin::Factory(a, a_options), Plugin::Factory(b, b_options)) => {
                a.ptr_eq(b) && a_options == b_options
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plugin::Hook(_) => f.write_str("Plugin::Hook"),
            Plugin::App(app) => f.debug_tuple("Plugin::App").field(&app.fullname()).finish(),
            Plugin::Factory(factory, options) => f
                .debug_tuple("Plugin::Factory")
                .field(&factory.name())
                .field(options)
                .finish(),
        }
    }
}

impl From<Application> for Plugin {
    fn from(app: Application) -> Self {
        Plugin::App(app)
    }
}

impl From<&Application> for Plugin {
    fn from(app: &Application) -> Self {
        Plugin::App(app.clone())
    }
}

/// 1 つのホストにマウント済みのプラグインと、それが生んだ子
#[derive(Debug, Default)]
pub struct PluginRegistry {
    mounted: Vec<Plugin>,
    children: Vec<Application>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, plugin: &Plugin) -> bool {
        self.mounted.iter().any(|known| known.same_as(plugin))
    }

    pub fn len(&self) -> usize {
        self.mounted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    pub fn children(&self) -> &[Application] {
        &self.children
    }

    fn record(&mut self, plugin: Plugin) {
        self.mounted.push(plugin);
    }

    fn adopt(&mut self, child: Application) {
        self.children.push(child);
    }
}

impl Application {
    /// プラグインをマウントする。同じプラグインの 2 回目は何もしない
    ///
    /// # Errors
    /// 自分自身や子孫へのマウント、すでに親を持つアプリケーションのマウントは
    /// `AppError::InvalidPlugin`
    pub fn use_plugin(&self, plugin: impl Into<Plugin>) -> Result<&Self, AppError> {
        let plugin = plugin.into();
        if self.inner.plugins.borrow().contains(&plugin) {
            tracing::debug!(app = %self.fullname(), plugin = ?plugin, "plugin already mounted");
            return Ok(self);
        }

        match &plugin {
            Plugin::Hook(hook) => {
                let hook = hook.clone();
                self.inner.plugins.borrow_mut().record(plugin);
                self.startup(move |app| hook(app));
            }
            Plugin::App(child) => {
                let child = child.clone();
                self.check_mountable(&child)?;
                self.inner.plugins.borrow_mut().record(plugin);
                self.mount_child(child);
            }
            Plugin::Factory(factory, options) => {
                let child = factory.build_for(self, options.clone())?;
                self.inner.plugins.borrow_mut().record(plugin);
                self.mount_child(child);
            }
        }
        Ok(self)
    }

    /// このアプリケーションにマウントされた子（マウント順）
    pub fn children(&self) -> Vec<Application> {
        self.inner.plugins.borrow().children().to_vec()
    }

    /// マウント済みの異なるプラグイン数
    pub fn plugin_count(&self) -> usize {
        self.inner.plugins.borrow().len()
    }

    fn check_mountable(&self, child: &Application) -> Result<(), AppError> {
        if child.ptr_eq(self) {
            return Err(AppError::InvalidPlugin(format!(
                "application '{}' cannot be mounted onto itself",
                self.fullname()
            )));
        }
        if let Some(parent) = child.parent() {
            return Err(AppError::InvalidPlugin(format!(
                "application '{}' is already mounted on '{}'",
                child.name(),
                parent.fullname()
            )));
        }
        if self.ancestors().iter().any(|ancestor| ancestor.ptr_eq(child)) {
            return Err(AppError::InvalidPlugin(format!(
                "application '{}' is an ancestor of '{}'",
                child.name(),
                self.fullname()
            )));
        }
        Ok(())
    }

    fn mount_child(&self, child: Application) {
        *child.inner.parent.borrow_mut() = Some(self.downgrade());
        self.inner.plugins.borrow_mut().adopt(child.clone());
        tracing::debug!(app = %self.fullname(), child = %child.fullname(), "mounted application");

        sync_state(self, &child);
        child.emit(EventKind::Mount, &Event::Mount { parent: self.clone() });
    }

    fn child_failed(&self, child: &Application) {
        match self.inner.child_failure {
            ChildFailurePolicy::Release => {
                tracing::warn!(app = %self.fullname(), child = %child.fullname(), "mounted application failed");
            }
            ChildFailurePolicy::Propagate => {
                self.report(Failure::new(AppError::ChildFailed(child.fullname())));
            }
        }
    }
}

/// `host` が `child` を追い越さないようにする
///
/// ホストがフェーズに入るたびに再評価する。
fn sync_state(host: &Application, child: &Application) {
    let Some(host_phase) = host.phase() else {
        watch_host(host, child.clone());
        return;
    };
    if host_phase.is_terminal() {
        return;
    }

    match child.phase() {
        Some(Phase::Fail) => host.child_failed(child),
        Some(phase) if phase.rank() > host_phase.rank() => watch_host(host, child.clone()),
        _ => {
            let hold = host.wait();
            watch_child(host.downgrade(), child, hold);
        }
    }
}

fn watch_host(host: &Application, child: Application) {
    host.once(EventKind::State, move |host, _| {
        sync_state(host, &child);
        Ok(())
    });
}

/// `child` がホストのフェーズを越えるか失敗するまで `host` を hold する
fn watch_child(host: Weak<AppInner>, child: &Application, hold: Release) {
    child.once(EventKind::State, move |child, _| {
        let Some(host) = Application::from_weak(&host) else {
            return Ok(());
        };
        let host_phase = host.phase();

        match child.phase() {
            Some(Phase::Fail) => {
                // 先に報告する。release でホストが RUNNING まで進みうる
                host.child_failed(child);
                hold.release();
            }
            Some(phase) if host_phase.is_none_or(|p| phase.rank() > p.rank()) => {
                // release の前に監視を登録する。release でホストが進みうる
                watch_host(&host, child.clone());
                hold.release();
            }
            _ => watch_child(host.downgrade(), child, hold.clone()),
        }
        Ok(())
    });
}
