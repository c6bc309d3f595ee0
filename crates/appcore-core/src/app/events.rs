//! EventBus - `on` / `once` / `off` の裏にあるリスナー登録簿

use std::cell::RefCell;
use std::rc::Rc;

use crate::domain::{AppError, Event, EventKind, Failure, HookResult};

use super::Application;

type Listener = Box<dyn FnMut(&Application, &Event) -> HookResult>;

/// `on`/`once` が返し、`off` が受け取るハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    callback: Rc<RefCell<Listener>>,
}

/// 1 アプリケーションのリスナー（登録順）
#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<Registration>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, kind: EventKind, once: bool, callback: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push(Registration {
            id,
            kind,
            once,
            callback: Rc::new(RefCell::new(callback)),
        });
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|registration| registration.id != id);
        before != self.listeners.len()
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listeners.iter().any(|registration| registration.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// `kind` を購読しているコールバック。`once` のものは取り除く
    ///
    /// 実行中に追加されたリスナーは今回の通知には含まれない。
    fn take_snapshot(&mut self, kind: EventKind) -> Vec<Rc<RefCell<Listener>>> {
        let snapshot = self
            .listeners
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| registration.callback.clone())
            .collect();
        self.listeners
            .retain(|registration| !(registration.once && registration.kind == kind));
        snapshot
    }
}

impl Application {
    /// [`Application::off`] まで `kind` を購読
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl FnMut(&Application, &Event) -> HookResult + 'static,
    ) -> ListenerId {
        self.inner.events.borrow_mut().add(kind, false, Box::new(listener))
    }

    /// 次の `kind` イベントだけを購読
    pub fn once(
        &self,
        kind: EventKind,
        listener: impl FnMut(&Application, &Event) -> HookResult + 'static,
    ) -> ListenerId {
        self.inner.events.borrow_mut().add(kind, true, Box::new(listener))
    }

    /// イベント名の文字列（`"state:ready"`）で [`Application::on`]
    pub fn on_named(
        &self,
        event: &str,
        listener: impl FnMut(&Application, &Event) -> HookResult + 'static,
    ) -> Result<ListenerId, AppError> {
        Ok(self.on(event.parse()?, listener))
    }

    /// リスナーを外す。すでになければ `false`
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.borrow_mut().remove(id)
    }

    pub(crate) fn has_listeners(&self, kind: EventKind) -> bool {
        self.inner.events.borrow().has_listeners(kind)
    }

    /// `kind` のリスナーに `event` を届ける
    ///
    /// リスナーのエラーは error channel で報告する。
    /// ただし `error` リスナーの失敗は記録のみ。
    pub(crate) fn emit(&self, kind: EventKind, event: &Event) {
        let listeners = self.inner.events.borrow_mut().take_snapshot(kind);
        for listener in listeners {
            let result = {
                let Ok(mut callback) = listener.try_borrow_mut() else {
                    tracing::warn!(app = %self.fullname(), event = %kind, "listener re-entered, skipped");
                    continue;
                };
                (&mut **callback)(self, event)
            };
            if let Err(failure) = result {
                if kind == EventKind::Error {
                    let failure = Failure::new(AppError::Plugin(failure));
                    tracing::warn!(app = %self.fullname(), error = %failure, "error listener failed");
                    self.inner.errors.borrow_mut().push(failure);
                } else {
                    self.report_plugin_failure(failure);
                }
            }
        }
    }
}
