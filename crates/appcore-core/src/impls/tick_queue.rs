//! TickQueue - 手動で進めるイベントループ

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::ports::{Scheduler, Task};

/// TickQueue は所有者が実行するまで遅延タスクを溜める
///
/// # 使用例
/// ```ignore
/// let ticks = Rc::new(TickQueue::new());
/// let app = Application::builder().scheduler(ticks.clone()).build()?;
/// ticks.run_until_idle(); // preboot -> startup -> ready -> running
/// ```
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 実行待ちのタスク数
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// ターン開始時点でキューにあったタスクを実行する
    ///
    /// 実行中に遅延されたタスクは次のターンに回す。実行したタスク数を返す。
    pub fn turn(&self) -> usize {
        let queued = self.pending();
        for _ in 0..queued {
            if !self.run_one() {
                break;
            }
        }
        queued
    }

    /// キューが空になるまでターンを回す。実行したタスク数を返す。
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    fn run_one(&self) -> bool {
        // タスクがさらに defer するので、実行前に borrow を終える
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

impl Scheduler for TickQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}
