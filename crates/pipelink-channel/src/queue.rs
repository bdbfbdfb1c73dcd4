use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// FIFO of outbound payloads with a single blocking consumer.
///
/// Producers push under the same mutex the consumer holds while checking
/// for work, and the consumer's liveness predicate is evaluated under that
/// mutex too, so neither a submission nor a close can slip in between the
/// "queue empty" check and the wait.
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    inner: Mutex<QueueState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<String>,
    /// An item has been handed to the consumer and not yet completed.
    writing: bool,
}

impl OutboundQueue {
    pub(crate) fn push(&self, text: String) {
        let mut state = self.lock();
        state.items.push_back(text);
        self.cond.notify_all();
    }

    /// Wait for the next item while `live()` holds.
    ///
    /// Returns `None` as soon as `live()` is false, checked before every
    /// pop and after every wakeup. Call [`OutboundQueue::complete`] once the
    /// returned item is written.
    pub(crate) fn next_blocking(&self, live: impl Fn() -> bool) -> Option<String> {
        let mut state = self.lock();
        loop {
            if !live() {
                return None;
            }
            if let Some(text) = state.items.pop_front() {
                state.writing = true;
                return Some(text);
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn complete(&self) {
        let mut state = self.lock();
        state.writing = false;
        self.cond.notify_all();
    }

    /// Wake every waiter so it re-evaluates its predicate.
    pub(crate) fn wake(&self) {
        let _state = self.lock();
        self.cond.notify_all();
    }

    /// Drop all pending items, returning how many were discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        self.cond.notify_all();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Wait until the queue is empty and no write is in flight.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.items.is_empty() || state.writing {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
