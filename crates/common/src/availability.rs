//! Worker availability feedback channel
//!
//! Workers announce "my dedicated queue is drained" by publishing their index
//! here; the dispatcher takes an index whenever it must pin a brand-new
//! client. The channel is bounded to the pool size. Publications beyond that
//! are dropped rather than blocking the worker, so an index can be missing or
//! appear twice. Both are harmless: the channel is a hint, not a ledger.

use crate::error::{PinpoolError, Result};
use crate::message::WorkerIndex;
use crate::shutdown::ShutdownSignal;
use crossbeam::channel::{self, select, Receiver, Sender, TrySendError};
use tracing::trace;

/// Bounded multi-producer, single-consumer channel of worker indices
#[derive(Debug, Clone)]
pub struct AvailabilityChannel {
    tx: Sender<WorkerIndex>,
    rx: Receiver<WorkerIndex>,
    capacity: usize,
}

impl AvailabilityChannel {
    /// Create a channel for `pool_size` workers with every index available
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(PinpoolError::invalid_input("pool size must be positive"));
        }

        let (tx, rx) = channel::bounded(pool_size);
        for index in 0..pool_size {
            // Cannot fail: exactly `pool_size` sends into a fresh channel.
            tx.try_send(index)
                .map_err(|e| PinpoolError::internal(format!("seeding availability: {}", e)))?;
        }

        Ok(Self {
            tx,
            rx,
            capacity: pool_size,
        })
    }

    /// Block until some worker index is available
    ///
    /// Returns [`PinpoolError::Cancelled`] if `shutdown` fires first.
    pub fn take(&self, shutdown: &ShutdownSignal) -> Result<WorkerIndex> {
        if shutdown.is_triggered() {
            return Err(PinpoolError::cancelled("availability wait"));
        }

        // Fast path keeps a ready index from racing a concurrent trigger.
        if let Ok(index) = self.rx.try_recv() {
            return Ok(index);
        }

        select! {
            recv(self.rx) -> index => {
                index.map_err(|_| PinpoolError::channel_closed("availability channel"))
            }
            recv(shutdown.receiver()) -> _ => {
                Err(PinpoolError::cancelled("availability wait"))
            }
        }
    }

    /// Publish `index` without blocking
    ///
    /// Returns `false` if the channel is full and the publication was dropped.
    pub fn try_publish(&self, index: WorkerIndex) -> bool {
        match self.tx.try_send(index) {
            Ok(()) => true,
            Err(TrySendError::Full(index)) => {
                trace!("Availability channel full, dropping index {}", index);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Number of indices currently held
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_starts_with_every_index() {
        let channel = AvailabilityChannel::new(3).unwrap();
        let shutdown = ShutdownSignal::new();

        assert_eq!(channel.len(), 3);

        let taken: HashSet<_> = (0..3).map(|_| channel.take(&shutdown).unwrap()).collect();
        assert_eq!(taken, HashSet::from([0, 1, 2]));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        assert!(AvailabilityChannel::new(0).is_err());
    }

    #[test]
    fn test_publish_is_bounded() {
        let channel = AvailabilityChannel::new(2).unwrap();

        // Already full from seeding; duplicates are dropped, never queued.
        assert!(!channel.try_publish(0));
        assert!(!channel.try_publish(1));
        assert_eq!(channel.len(), channel.capacity());

        let shutdown = ShutdownSignal::new();
        channel.take(&shutdown).unwrap();
        assert!(channel.try_publish(1));
        assert!(!channel.try_publish(1));
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn test_duplicate_indices_tolerated() {
        let channel = AvailabilityChannel::new(2).unwrap();
        let shutdown = ShutdownSignal::new();
        channel.take(&shutdown).unwrap();
        channel.take(&shutdown).unwrap();

        assert!(channel.try_publish(1));
        assert!(channel.try_publish(1));
        assert_eq!(channel.take(&shutdown).unwrap(), 1);
        assert_eq!(channel.take(&shutdown).unwrap(), 1);
    }

    #[test]
    fn test_take_interrupted_by_shutdown() {
        let channel = AvailabilityChannel::new(1).unwrap();
        let shutdown = ShutdownSignal::new();
        channel.take(&shutdown).unwrap();

        let waiter = {
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || channel.take(&shutdown))
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(ref e) if e.is_cancellation()));
    }

    #[test]
    fn test_take_wakes_on_publish() {
        let channel = AvailabilityChannel::new(2).unwrap();
        let shutdown = ShutdownSignal::new();
        channel.take(&shutdown).unwrap();
        channel.take(&shutdown).unwrap();

        let waiter = {
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || channel.take(&shutdown))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(channel.try_publish(1));

        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }
}
