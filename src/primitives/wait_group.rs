//! Wait-group: a counter plus a condition variable (`Mutex<bool>` +
//! `Condvar`), generalized from a single boolean flag to a counter that
//! wakes all waiters once it reaches zero.

use crate::loom::{Condvar, Mutex};

/// Lets one or more threads block until a set of tasks, each represented by
/// one [`WaitGroup::add`]/[`WaitGroup::done`] pair, all complete.
pub struct WaitGroup {
    state: Mutex<u32>,
    condvar: Condvar,
}

impl WaitGroup {
    /// Creates a wait-group with nothing outstanding.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Registers `n` additional outstanding tasks.
    pub fn add(&self, n: u32) {
        let mut count = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *count += n;
    }

    /// Marks one task complete. Wakes every blocked [`Self::wait`] once the
    /// count reaches zero.
    pub fn done(&self) {
        let mut count = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(*count > 0, "done() called more times than add()");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.condvar.notify_all();
        }
    }

    /// Blocks until the outstanding count reaches zero. Returns immediately
    /// if it already is.
    pub fn wait(&self) {
        let mut count = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self
                .condvar
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_with_nothing_outstanding() {
        let wg = WaitGroup::new();
        wg.wait();
    }

    #[test]
    fn wait_blocks_until_every_done_call_lands() {
        let wg = Arc::new(WaitGroup::new());
        wg.add(3);
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let wg = wg.clone();
                thread::spawn(move || {
                    thread::sleep(std::time::Duration::from_millis(10));
                    wg.done();
                })
            })
            .collect();
        wg.wait();
        for w in workers {
            w.join().unwrap();
        }
    }
}
