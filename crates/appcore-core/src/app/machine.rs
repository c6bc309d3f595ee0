//! PhaseMachine - フェーズの順序制御と一回限りの phase hook
//!
//! hook はフェーズごとのキューで待つ。遷移のたびに、到達済みフェーズのキューを
//! 低いフェーズから順に、フェーズ内では登録順に実行する。
//! 到達済みフェーズの hook は登録した呼び出しが戻る前にすぐ実行する。

use std::collections::VecDeque;

use crate::domain::{AppError, Event, EventKind, HookResult, Phase};

use super::Application;

/// 一回限りの phase hook
pub type Hook = Box<dyn FnOnce(&Application) -> HookResult>;

const QUEUES: usize = 5;

/// 現在のフェーズと、後のフェーズを待つ hook
pub struct PhaseMachine {
    current: Option<Phase>,
    /// `Phase::rank` で添字付け
    waiting: [VecDeque<Hook>; QUEUES],
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: None,
            waiting: std::array::from_fn(|_| VecDeque::new()),
        }
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    /// まだ自分のフェーズを待っている hook 数
    pub fn waiting(&self) -> usize {
        self.waiting.iter().map(VecDeque::len).sum()
    }

    /// `phase` 用に `hook` をキューに入れる
    ///
    /// `phase` に到達済みなら hook をそのまま返すので、呼び出し側がすぐ実行する。
    /// 実行されえない hook は捨てる。
    pub fn register(&mut self, phase: Phase, hook: Hook) -> Option<Hook> {
        if phase.is_reached_by(self.current) {
            return Some(hook);
        }
        if self.current.is_some_and(Phase::is_terminal) {
            return None;
        }
        self.waiting[phase.rank()].push_back(hook);
        None
    }

    /// `phase` に移る。`Fail` に入ると成功側の hook はすべて捨てる
    pub fn set(&mut self, phase: Phase) {
        self.current = Some(phase);
        match phase {
            Phase::Fail => {
                for queue in &mut self.waiting[Phase::BEGIN.rank()..] {
                    queue.clear();
                }
            }
            Phase::Running => self.waiting[Phase::Fail.rank()].clear(),
            _ => {}
        }
    }

    /// フェーズに到達済みの次の hook
    pub fn take_ready(&mut self) -> Option<Hook> {
        let current = self.current?;
        if current.is_fail() {
            return self.waiting[Phase::Fail.rank()].pop_front();
        }
        (Phase::BEGIN.rank()..=current.rank()).find_map(|rank| self.waiting[rank].pop_front())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    /// `phase` に到達したら `hook` を実行する（到達済みなら即時）
    ///
    /// `Phase::Fail` の hook は失敗したときだけ実行する。
    /// hook が返したエラーは `AppError::Plugin` として報告する。
    pub fn on_state(
        &self,
        phase: Phase,
        hook: impl FnOnce(&Application) -> HookResult + 'static,
    ) -> &Self {
        let ready = self.inner.machine.borrow_mut().register(phase, Box::new(hook));
        if let Some(hook) = ready {
            self.run_hook(hook);
        }
        self
    }

    /// フェーズ名（`"ready"`, `"fail"` など）で [`Application::on_state`]
    pub fn on_state_named(
        &self,
        phase: &str,
        hook: impl FnOnce(&Application) -> HookResult + 'static,
    ) -> Result<&Self, AppError> {
        let phase: Phase = phase.parse()?;
        Ok(self.on_state(phase, hook))
    }

    pub fn preboot(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        self.on_state(Phase::Preboot, hook)
    }

    pub fn startup(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        self.on_state(Phase::Startup, hook)
    }

    pub fn ready(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        self.on_state(Phase::Ready, hook)
    }

    pub fn running(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        self.on_state(Phase::Running, hook)
    }

    pub fn fail(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        self.on_state(Phase::Fail, hook)
    }

    /// 現在の次のフェーズで `hook` を実行する
    ///
    /// running か失敗後なら何もしない。
    pub fn next(&self, hook: impl FnOnce(&Application) -> HookResult + 'static) -> &Self {
        match Phase::after(self.phase()) {
            Some(phase) => self.on_state(phase, hook),
            None => self,
        }
    }

    /// gate 完了時: フェーズを 1 つ進める
    fn advance(&self) {
        let current = self.phase();
        if current.is_some_and(Phase::is_terminal) {
            return;
        }
        if let Some(next) = Phase::after(current) {
            self.enter(next);
        }
    }

    /// `target` に入る。前回の遷移以降にエラーが報告されていれば FAIL に入る
    pub(crate) fn enter(&self, target: Phase) {
        if !self.inner.errors.borrow().is_empty() {
            self.enter_fail();
            return;
        }

        self.inner.machine.borrow_mut().set(target);

        // このフェーズの hook が先に hold を取れるよう、解放は後のターンで行う
        let hold = self.inner.gate.wait();
        self.inner.scheduler.defer(Box::new(move || hold.release()));

        if target == Phase::END {
            tracing::info!(app = %self.fullname(), "application running");
        } else {
            tracing::debug!(app = %self.fullname(), phase = %target, "entered phase");
        }

        self.run_ready_hooks();
        self.announce(target);
    }

    fn enter_fail(&self) {
        if self.is_failed() {
            return;
        }

        self.inner.machine.borrow_mut().set(Phase::Fail);
        tracing::warn!(
            app = %self.fullname(),
            errors = self.inner.errors.borrow().len(),
            "application failed"
        );

        self.run_ready_hooks();
        self.announce(Phase::Fail);

        if self.is_root() {
            self.inner.supervisor.root_failed(self);
        }
    }

    fn run_hook(&self, hook: Hook) {
        if let Err(failure) = hook(self) {
            self.report_plugin_failure(failure);
        }
    }

    fn run_ready_hooks(&self) {
        loop {
            let hook = self.inner.machine.borrow_mut().take_ready();
            match hook {
                Some(hook) => self.run_hook(hook),
                None => break,
            }
        }
    }

    fn announce(&self, phase: Phase) {
        let event = Event::State(phase);
        self.emit(EventKind::StateAt(phase), &event);
        self.emit(EventKind::State, &event);
    }

    /// まだ構築中のアプリケーション用に gate 完了コールバックを作る
    pub(super) fn gate_completion(weak: std::rc::Weak<super::AppInner>) -> impl FnMut() + 'static {
        move || {
            if let Some(app) = Application::from_weak(&weak) {
                app.advance();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::app::testing;
    use crate::domain::Failure;
    use crate::impls::TickQueue;
    use crate::ports::Supervisor;

    fn recorder(app: &Application) -> Rc<RefCell<Vec<Phase>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        app.on(EventKind::State, move |_, event| {
            log.borrow_mut().extend(event.phase());
            Ok(())
        });
        seen
    }

    fn error_sink(app: &Application) -> Rc<RefCell<Vec<Failure>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        app.on(EventKind::Error, move |_, event| {
            if let Event::Error(failure) = event {
                log.borrow_mut().push(failure.clone());
            }
            Ok(())
        });
        seen
    }

    #[test]
    fn machine_queues_until_phase_reached() {
        let mut machine = PhaseMachine::new();
        let hook: Hook = Box::new(|_| Ok(()));
        assert!(machine.register(Phase::Ready, hook).is_none());
        assert_eq!(machine.waiting(), 1);

        machine.set(Phase::Startup);
        assert!(machine.take_ready().is_none());

        machine.set(Phase::Ready);
        assert!(machine.take_ready().is_some());
        assert_eq!(machine.waiting(), 0);
    }

    #[test]
    fn machine_drops_success_hooks_on_fail() {
        let mut machine = PhaseMachine::new();
        machine.set(Phase::Preboot);
        machine.register(Phase::Running, Box::new(|_| Ok(())));
        machine.register(Phase::Fail, Box::new(|_| Ok(())));

        machine.set(Phase::Fail);
        assert_eq!(machine.waiting(), 1);
        assert!(machine.take_ready().is_some());
        assert!(machine.register(Phase::Running, Box::new(|_| Ok(()))).is_none());
        assert_eq!(machine.waiting(), 0);
    }

    #[test]
    fn moves_through_phases_in_order() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let seen = recorder(&app);

        assert_eq!(app.phase(), Some(Phase::Preboot));
        ticks.turn();
        assert_eq!(app.phase(), Some(Phase::Startup));
        ticks.turn();
        assert_eq!(app.phase(), Some(Phase::Ready));
        ticks.turn();
        assert_eq!(app.phase(), Some(Phase::Running));

        assert_eq!(ticks.run_until_idle(), 1, "running still releases its own hold");
        assert_eq!(app.phase(), Some(Phase::Running));
        assert_eq!(*seen.borrow(), vec![Phase::Startup, Phase::Ready, Phase::Running]);
    }

    #[test]
    fn hooks_for_reached_phases_run_synchronously() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        app.preboot(move |_| {
            l.borrow_mut().push("preboot");
            Ok(())
        });
        let l = log.clone();
        app.ready(move |_| {
            l.borrow_mut().push("ready");
            Ok(())
        });
        let l = log.clone();
        app.startup(move |_| {
            l.borrow_mut().push("startup");
            Ok(())
        });
        assert_eq!(*log.borrow(), vec!["preboot"]);

        ticks.run_until_idle();
        assert_eq!(*log.borrow(), vec!["preboot", "startup", "ready"]);

        let l = log.clone();
        app.startup(move |_| {
            l.borrow_mut().push("late startup");
            Ok(())
        });
        assert_eq!(log.borrow().last(), Some(&"late startup"));
    }

    #[test]
    fn next_is_not_called_early() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        app.next(move |app| {
            assert_eq!(app.phase(), Some(Phase::Startup));
            flag.set(true);
            Ok(())
        });
        assert!(!ran.get());

        ticks.turn();
        assert!(ran.get());
    }

    #[test]
    fn next_does_nothing_when_running() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        ticks.run_until_idle();

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        app.next(move |_| {
            flag.set(true);
            Ok(())
        });
        ticks.run_until_idle();
        assert!(!ran.get());
    }

    #[test]
    fn wait_prevents_advancing() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let _hold = app.wait();

        ticks.run_until_idle();
        assert_eq!(app.phase(), Some(Phase::Preboot));
        assert_eq!(app.pending_holds(), 1);
    }

    #[test]
    fn last_release_advances_synchronously() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let first = app.wait();
        let second = app.wait();
        ticks.run_until_idle();

        first.release();
        assert_eq!(app.phase(), Some(Phase::Preboot));

        second.release();
        assert_eq!(app.phase(), Some(Phase::Startup), "advanced inside release()");
    }

    #[test]
    fn double_release_does_not_double_advance() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let done = app.wait();
        done.release();
        done.release();

        ticks.turn();
        assert_eq!(app.phase(), Some(Phase::Startup));
    }

    #[test]
    fn named_registration_rejects_unknown_phase() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");

        let err = app.on_state_named("notastate", |_| Ok(())).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(err.to_string().to_lowercase().contains("invalid state"));

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        app.on_state_named("preboot", move |_| {
            flag.set(true);
            Ok(())
        })
        .unwrap();
        assert!(ran.get());
    }

    #[test]
    fn error_forces_fail_and_skips_later_hooks() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let errors = error_sink(&app);
        let seen = recorder(&app);
        let failed = Rc::new(Cell::new(false));
        let ran_ready = Rc::new(Cell::new(false));

        app.startup(|app| {
            app.error(Failure::msg("some error")).unwrap();
            Ok(())
        });
        let flag = ran_ready.clone();
        app.ready(move |_| {
            flag.set(true);
            Ok(())
        });
        let flag = failed.clone();
        app.fail(move |_| {
            flag.set(true);
            Ok(())
        });

        ticks.run_until_idle();
        assert_eq!(app.phase(), Some(Phase::Fail));
        assert!(failed.get());
        assert!(!ran_ready.get());
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(*seen.borrow(), vec![Phase::Startup, Phase::Fail]);
    }

    #[test]
    fn fail_is_absorbing() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let _errors = error_sink(&app);
        let seen = recorder(&app);

        app.error(Failure::msg("first")).unwrap();
        ticks.run_until_idle();
        assert_eq!(app.phase(), Some(Phase::Fail));

        app.error(Failure::msg("second")).unwrap();
        app.wait().release();
        ticks.run_until_idle();

        assert_eq!(app.phase(), Some(Phase::Fail));
        assert_eq!(app.errors().len(), 2);
        assert_eq!(*seen.borrow(), vec![Phase::Fail]);

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        app.fail(move |_| {
            flag.set(true);
            Ok(())
        });
        assert!(ran.get(), "fail hook registered after failing runs immediately");
    }

    #[test]
    fn errors_after_running_do_not_fail() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let _errors = error_sink(&app);
        ticks.run_until_idle();

        app.error(Failure::msg("late")).unwrap();
        ticks.run_until_idle();
        assert_eq!(app.phase(), Some(Phase::Running));
    }

    #[test]
    fn failing_hook_is_reported_as_plugin_error() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let errors = error_sink(&app);

        app.startup(|_| Err(Failure::msg("hook exploded")));
        ticks.run_until_idle();

        assert_eq!(app.phase(), Some(Phase::Fail));
        let reported = errors.borrow();
        assert_eq!(reported.len(), 1);
        assert!(matches!(
            reported[0].downcast_ref::<AppError>(),
            Some(AppError::Plugin(inner)) if inner.to_string() == "hook exploded"
        ));
    }

    #[test]
    fn failing_state_listener_is_rerouted() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let errors = error_sink(&app);

        app.once(EventKind::StateAt(Phase::Startup), |_, _| {
            Err(Failure::msg("listener exploded"))
        });
        ticks.run_until_idle();

        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(app.phase(), Some(Phase::Fail));
    }

    #[derive(Default)]
    struct RecordingSupervisor {
        unhandled: RefCell<Vec<String>>,
        root_failures: Cell<u32>,
    }

    impl Supervisor for RecordingSupervisor {
        fn unhandled(&self, _app: &Application, failure: &Failure) {
            self.unhandled.borrow_mut().push(failure.to_string());
        }

        fn root_failed(&self, _app: &Application) {
            self.root_failures.set(self.root_failures.get() + 1);
        }
    }

    #[test]
    fn unhandled_hook_failure_reaches_supervisor() {
        let ticks = Rc::new(TickQueue::new());
        let supervisor = Rc::new(RecordingSupervisor::default());
        let app = testing::builder(&ticks)
            .name("root")
            .supervisor(supervisor.clone())
            .build()
            .unwrap();

        app.startup(|_| Err(Failure::msg("nobody listens")));
        ticks.run_until_idle();

        assert_eq!(app.phase(), Some(Phase::Fail));
        assert_eq!(supervisor.unhandled.borrow().len(), 1);
        assert!(supervisor.unhandled.borrow()[0].contains("nobody listens"));
        assert_eq!(supervisor.root_failures.get(), 1);
    }

    #[test]
    fn unhandled_error_returned_from_hook_is_stored_once() {
        let ticks = Rc::new(TickQueue::new());
        let supervisor = Rc::new(RecordingSupervisor::default());
        let app = testing::builder(&ticks)
            .supervisor(supervisor.clone())
            .build()
            .unwrap();
        let failure = Failure::msg("x");

        let reported = failure.clone();
        app.startup(move |app| {
            app.error(reported)?;
            Ok(())
        });
        ticks.run_until_idle();

        let errors = app.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].ptr_eq(&failure));
        assert_eq!(app.phase(), Some(Phase::Fail));
        assert_eq!(*supervisor.unhandled.borrow(), vec!["x".to_string()]);
    }

    #[test]
    fn unhandled_error_returned_from_listener_is_stored_once() {
        let ticks = Rc::new(TickQueue::new());
        let app = testing::app(&ticks, "app");
        let failure = Failure::msg("x");

        let reported = failure.clone();
        app.once(EventKind::StateAt(Phase::Startup), move |app, _| {
            app.error(reported.clone())?;
            Ok(())
        });
        ticks.run_until_idle();

        assert_eq!(app.errors().len(), 1);
        assert_eq!(app.phase(), Some(Phase::Fail));
    }

    #[test]
    fn root_failure_is_reported_once() {
        let ticks = Rc::new(TickQueue::new());
        let supervisor = Rc::new(RecordingSupervisor::default());
        let app = testing::builder(&ticks)
            .supervisor(supervisor.clone())
            .build()
            .unwrap();
        let _errors = error_sink(&app);

        app.error(Failure::msg("a")).unwrap();
        ticks.run_until_idle();
        app.error(Failure::msg("b")).unwrap();
        app.wait().release();
        ticks.run_until_idle();

        assert_eq!(supervisor.root_failures.get(), 1);
    }
}
