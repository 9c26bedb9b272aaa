//! State that only the consumer thread may touch.
//!
//! Stands in for UI or scene state in a real host: producers never reach it
//! directly, they submit work that reads or updates it during a tick.

use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct Board {
    updates: BTreeMap<usize, u64>,
    task_steps: u64,
}

impl Board {
    pub fn record_update(&mut self, producer: usize) {
        *self.updates.entry(producer).or_default() += 1;
    }

    pub fn record_task_step(&mut self) {
        self.task_steps += 1;
    }

    pub fn total_updates(&self) -> u64 {
        self.updates.values().sum()
    }

    pub fn summary(&self) -> String {
        let per_producer = self
            .updates
            .iter()
            .map(|(producer, count)| format!("p{producer}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "updates={} task_steps={} [{per_producer}]",
            self.total_updates(),
            self.task_steps
        )
    }
}

thread_local! {
    static BOARD: RefCell<Board> = RefCell::new(Board::default());
}

/// Run `f` against the calling thread's board. Work items call this from the
/// consumer thread, so they all see the same board.
pub fn with_board<T>(f: impl FnOnce(&mut Board) -> T) -> T {
    BOARD.with(|board| f(&mut board.borrow_mut()))
}
