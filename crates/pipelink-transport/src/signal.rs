use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// One-shot "endpoint destroyed" flag that sleeping threads can wait on.
///
/// Used by listeners between accept polls and by connectors during retry
/// backoff, so a destroy from another thread wakes them immediately.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every waiter. Idempotent.
    pub fn trigger(&self) {
        let mut triggered = self
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *triggered = true;
        self.cond.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`, returning early if triggered.
    ///
    /// Returns `true` if the signal is triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let triggered = self
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (triggered, _) = self
            .cond
            .wait_timeout_while(triggered, timeout, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *triggered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_times_out_when_untriggered() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn trigger_wakes_waiter_early() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let woke = signal.wait_timeout(Duration::from_secs(10));
                (woke, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let (woke, elapsed) = waiter.join().expect("waiter should finish");
        assert!(woke);
        assert!(elapsed < Duration::from_secs(5));
        assert!(signal.is_triggered());
    }
}
