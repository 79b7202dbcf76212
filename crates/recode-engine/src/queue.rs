// crates/recode-engine/src/queue.rs
//
// Blocking serialized FIFO feeding the pipeline run loop. Codec
// callbacks push units of work from arbitrary threads; one thread pops
// and executes them in order. Error work jumps the line via push_front.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    aborted: bool,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                aborted: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Append to the back. No-op once aborted. Wakes one waiter.
    pub fn push(&self, item: T) {
        self.insert(item, false);
    }

    /// Prepend to the front so the item cuts ahead of any backlog.
    /// No-op once aborted.
    pub fn push_front(&self, item: T) {
        self.insert(item, true);
    }

    fn insert(&self, item: T, front: bool) {
        let mut state = self.state.lock().unwrap();
        if state.aborted {
            return;
        }
        if front {
            state.items.push_front(item);
        } else {
            state.items.push_back(item);
        }
        self.cond.notify_one();
    }

    /// Block until an item is available and return the front one.
    ///
    /// Must not race with `abort()`: the run loop is the only popper and
    /// only aborts the queue after it has exited.
    pub fn pop(&self) -> T {
        let mut state = self.state.lock().unwrap();
        while state.items.is_empty() {
            state = self.cond.wait(state).unwrap();
        }
        state.items.pop_front().unwrap()
    }

    /// Drop all pending items and refuse every future push.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        state.aborted = true;
        state.items.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
