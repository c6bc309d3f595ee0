//! WaitGate - 自動で再武装するカウントダウンラッチ
//!
//! # 振る舞い
//! - `wait()` は hold を取り、その [`Release`] を返す
//! - 最後の hold を解放すると、その `release()` の中で同期的に完了コールバックが
//!   呼ばれ、gate は再武装する
//! - `Release` は何回呼んでも 1 回しか数えない
//! - 前回の発火以降に hold が取られていなければコールバックは呼ばれない

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

type Completion = Box<dyn FnMut()>;

struct GateState {
    holds: Cell<usize>,
    /// 直近の（再）武装以降に hold が取られた
    armed: Cell<bool>,
    /// gate が完了した回数
    generation: Cell<u64>,
    on_complete: RefCell<Option<Completion>>,
}

impl GateState {
    fn complete(&self) {
        self.armed.set(false);
        self.generation.set(self.generation.get() + 1);

        // 入れ子の `wait()` と borrow が重ならないよう、実行中は取り出しておく
        let callback = self.on_complete.borrow_mut().take();
        if let Some(mut callback) = callback {
            callback();
            let mut slot = self.on_complete.borrow_mut();
            if slot.is_none() {
                *slot = Some(callback);
            }
        }
    }
}

/// フェーズを進める参照カウント式のカウントダウンラッチ
#[derive(Clone)]
pub struct WaitGate {
    state: Rc<GateState>,
}

impl WaitGate {
    pub fn new(on_complete: impl FnMut() + 'static) -> Self {
        Self {
            state: Rc::new(GateState {
                holds: Cell::new(0),
                armed: Cell::new(false),
                generation: Cell::new(0),
                on_complete: RefCell::new(Some(Box::new(on_complete))),
            }),
        }
    }

    /// hold を取る。返したハンドルが解放されるまで gate は完了しない
    pub fn wait(&self) -> Release {
        self.state.holds.set(self.state.holds.get() + 1);
        self.state.armed.set(true);
        tracing::trace!(holds = self.state.holds.get(), "gate hold taken");
        Release {
            gate: self.state.clone(),
            released: Rc::new(Cell::new(false)),
        }
    }

    /// 未解放の hold 数
    pub fn pending(&self) -> usize {
        self.state.holds.get()
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.get()
    }

    /// gate が完了した回数
    pub fn generation(&self) -> u64 {
        self.state.generation.get()
    }
}

impl fmt::Debug for WaitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitGate")
            .field("holds", &self.pending())
            .field("armed", &self.is_armed())
            .field("generation", &self.generation())
            .finish()
    }
}

/// [`WaitGate`] の hold 1 つ分のハンドル
///
/// clone は hold を共有する。どれを解放しても 1 回だけ解放される。
/// `Release` を drop しても hold は解放されない。
#[derive(Clone)]
pub struct Release {
    gate: Rc<GateState>,
    released: Rc<Cell<bool>>,
}

impl Release {
    /// hold を解放する。2 回目以降は何もしない
    pub fn release(&self) {
        if self.released.replace(true) {
            return;
        }

        let holds = self.gate.holds.get().saturating_sub(1);
        self.gate.holds.set(holds);
        tracing::trace!(holds, "gate hold released");

        if holds == 0 && self.gate.armed.get() {
            self.gate.complete();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_gate() -> (WaitGate, Rc<Cell<u32>>) {
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let gate = WaitGate::new(move || counter.set(counter.get() + 1));
        (gate, fired)
    }

    #[test]
    fn fires_when_last_hold_released() {
        let (gate, fired) = counting_gate();
        let first = gate.wait();
        let second = gate.wait();

        first.release();
        assert_eq!(fired.get(), 0);
        assert_eq!(gate.pending(), 1);

        second.release();
        assert_eq!(fired.get(), 1);
        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.generation(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let (gate, fired) = counting_gate();
        let done = gate.wait();
        let other = gate.wait();

        done.release();
        done.release();
        done.clone().release();
        assert_eq!(fired.get(), 0, "double release must not count twice");

        other.release();
        assert_eq!(fired.get(), 1);

        other.release();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn rearms_after_firing() {
        let (gate, fired) = counting_gate();
        gate.wait().release();
        assert_eq!(fired.get(), 1);
        assert!(!gate.is_armed());

        let hold = gate.wait();
        assert!(gate.is_armed());
        hold.release();
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn holds_taken_inside_completion_belong_to_next_round() {
        let gate_slot: Rc<RefCell<Option<WaitGate>>> = Rc::new(RefCell::new(None));
        let pending: Rc<RefCell<Vec<Release>>> = Rc::new(RefCell::new(Vec::new()));
        let fired = Rc::new(Cell::new(0));

        let (slot, held, counter) = (gate_slot.clone(), pending.clone(), fired.clone());
        let gate = WaitGate::new(move || {
            counter.set(counter.get() + 1);
            if let Some(gate) = slot.borrow().as_ref() {
                held.borrow_mut().push(gate.wait());
            }
        });
        *gate_slot.borrow_mut() = Some(gate.clone());

        gate.wait().release();
        assert_eq!(fired.get(), 1);
        assert_eq!(gate.pending(), 1);

        let next = pending.borrow_mut().pop().unwrap();
        next.release();
        assert_eq!(fired.get(), 2);
    }
}
