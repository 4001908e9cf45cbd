//! Worker loop
//!
//! A [`Worker`] sequentially drains its dedicated queue, invoking the handler
//! for each message. Whenever the queue is empty after a handler call it
//! offers its index back to the dispatcher through the availability channel.
//!
//! The loop ends in one of two ways:
//!
//! - the queue closes (the dispatcher is gone) and has been fully drained, or
//! - the cancellation signal fires, in which case anything still queued is
//!   discarded and reported as abandoned.
//!
//! An in-flight handler call always runs to completion; cancellation is only
//! observed between messages.

use crate::handler::MessageHandler;
use crate::queue::{DedicatedReceiver, Take};
use anyhow::anyhow;
use pinpool_common::metrics::LatencyTimer;
use pinpool_common::{AvailabilityChannel, Message, ShutdownSignal, WorkerIndex, METRICS};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Per-worker counters returned when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub index: WorkerIndex,

    /// Handler calls that succeeded
    pub handled: u64,

    /// Handler calls that failed or panicked
    pub failed: u64,

    /// Messages discarded because of forced cancellation
    pub abandoned: u64,

    /// Whether the loop ended through cancellation rather than a drained queue
    pub cancelled: bool,
}

/// One worker slot of the pool
pub struct Worker {
    index: WorkerIndex,
    queue: DedicatedReceiver,
    availability: AvailabilityChannel,
    handler: Arc<dyn MessageHandler>,
    cancel: ShutdownSignal,
}

impl Worker {
    pub fn new(
        queue: DedicatedReceiver,
        availability: AvailabilityChannel,
        handler: Arc<dyn MessageHandler>,
        cancel: ShutdownSignal,
    ) -> Self {
        Self {
            index: queue.index(),
            queue,
            availability,
            handler,
            cancel,
        }
    }

    pub fn index(&self) -> WorkerIndex {
        self.index
    }

    /// Run until the queue is closed and drained, or until cancelled
    pub fn run(self) -> WorkerReport {
        debug!("Worker {} started", self.index);

        let mut report = WorkerReport {
            index: self.index,
            ..WorkerReport::default()
        };

        loop {
            let message = match self.queue.take(&self.cancel) {
                Take::Message(message) => message,
                Take::Closed => {
                    debug!("Worker {} queue closed and drained", self.index);
                    break;
                }
                Take::Cancelled => {
                    report.cancelled = true;
                    report.abandoned = self.queue.discard_remaining() as u64;
                    if report.abandoned > 0 {
                        METRICS.worker.messages_abandoned.inc_by(report.abandoned);
                        warn!(
                            "Worker {} cancelled with {} messages still queued",
                            self.index, report.abandoned
                        );
                    } else {
                        debug!("Worker {} cancelled", self.index);
                    }
                    break;
                }
            };

            match self.invoke(&message) {
                Ok(()) => {
                    report.handled += 1;
                    METRICS.worker.messages_handled.inc();
                }
                Err(e) => {
                    report.failed += 1;
                    METRICS.worker.handler_failures.inc();
                    error!(
                        "Worker {} failed to handle message for client {}: {:#}",
                        self.index,
                        message.client_id(),
                        e
                    );
                }
            }
            drop(message);

            if self.queue.is_empty() {
                self.announce_available();
            }
        }

        info!(
            "Worker {} stopped: handled={} failed={} abandoned={}",
            self.index, report.handled, report.failed, report.abandoned
        );
        report
    }

    fn invoke(&self, message: &Message) -> anyhow::Result<()> {
        METRICS.worker.in_flight.inc();
        let outcome = METRICS.worker.handler_duration.time(|| {
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.handler.handle(message, self.index)
            }))
        });
        METRICS.worker.in_flight.dec();

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("handler panicked: {}", panic_message(&*payload))),
        }
    }

    fn announce_available(&self) {
        if self.availability.try_publish(self.index) {
            trace!("Worker {} announced availability", self.index);
            METRICS.worker.availability_published.inc();
        } else {
            trace!("Worker {} availability dropped, channel full", self.index);
            METRICS.worker.availability_dropped.inc();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
