//! Broadcast shutdown signal
//!
//! A [`ShutdownSignal`] is a one-shot, idempotent broadcast. Every clone
//! observes the same trigger. Blocking waits select on [`receiver`], which
//! never yields a value and becomes ready (disconnected) once the signal
//! fires, so a single trigger wakes every waiter at once.
//!
//! [`receiver`]: ShutdownSignal::receiver

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    triggered: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Cloneable broadcast cancellation signal
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                receiver: rx,
            }),
        }
    }

    /// Fire the signal
    ///
    /// Returns `true` only for the call that actually fired it; later calls
    /// are no-ops.
    pub fn trigger(&self) -> bool {
        let sender = self.inner.trigger.lock().take();
        match sender {
            Some(sender) => {
                // Flag first, so a waiter woken by the disconnect sees it set.
                self.inner.triggered.store(true, Ordering::Release);
                drop(sender);
                true
            }
            None => false,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Receiver to use inside `select!`; ready once the signal has fired
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Block until the signal fires or `timeout` elapses
    ///
    /// Returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        match self.inner.receiver.recv_timeout(timeout) {
            Ok(()) | Err(channel::RecvTimeoutError::Disconnected) => true,
            Err(channel::RecvTimeoutError::Timeout) => self.is_triggered(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_all_clones() {
        let signal = ShutdownSignal::new();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        signal.trigger();

        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
    }

    #[test]
    fn test_wait_timeout_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }
}
