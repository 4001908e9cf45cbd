//! Dispatcher: turns one interleaved stream into per-worker ordered streams
//!
//! For every incoming message the dispatcher resolves the client's worker
//! through the [`DispatchMap`]. Known clients reuse their pinned worker;
//! unknown clients block until the availability channel yields an index and
//! are pinned to it permanently. The message is then appended to that
//! worker's dedicated queue.
//!
//! Pinning a new client is the single serialization point of the engine:
//! the dispatcher handles one message at a time, so a new assignment holds up
//! every message behind it until some worker becomes available.

use crate::dispatch_map::{Assignment, DispatchMap};
use crossbeam::channel::{select, Receiver};
use pinpool_common::{
    AvailabilityChannel, ClientId, Message, PinpoolError, Result, ShutdownSignal, WorkerIndex,
    METRICS,
};
use pinpool_worker::DedicatedSender;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info};

/// Why the dispatcher loop ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The incoming stream was closed and fully consumed
    #[default]
    StreamExhausted,

    /// The shutdown signal fired
    ShutdownRequested,

    /// The dispatcher thread panicked
    Panicked,
}

/// Dispatcher counters returned when the loop exits
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Messages appended to a dedicated queue
    pub dispatched: u64,

    /// Messages read from the stream but never enqueued
    pub dropped: u64,

    /// Final client pinnings
    pub pinnings: BTreeMap<ClientId, WorkerIndex>,

    pub stop_reason: StopReason,
}

enum Next {
    Message(Message),
    Exhausted,
    Shutdown,
}

/// Routes messages onto dedicated queues, preserving per-client order
pub struct Dispatcher {
    map: DispatchMap,
    queues: Vec<DedicatedSender>,
    availability: AvailabilityChannel,
    shutdown: ShutdownSignal,
}

impl Dispatcher {
    /// Create a dispatcher over `queues`, where `queues[i]` feeds worker `i`
    pub fn new(
        queues: Vec<DedicatedSender>,
        availability: AvailabilityChannel,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        if queues.is_empty() {
            return Err(PinpoolError::invalid_input("dispatcher needs at least one queue"));
        }
        if queues.len() != availability.capacity() {
            return Err(PinpoolError::invalid_input(format!(
                "{} queues but availability sized for {}",
                queues.len(),
                availability.capacity()
            )));
        }
        if let Some((position, queue)) = queues
            .iter()
            .enumerate()
            .find(|(position, queue)| queue.index() != *position)
        {
            return Err(PinpoolError::invalid_input(format!(
                "queue for worker {} found at position {}",
                queue.index(),
                position
            )));
        }

        Ok(Self {
            map: DispatchMap::new(),
            queues,
            availability,
            shutdown,
        })
    }

    /// Route one message to its client's worker queue
    ///
    /// Returns the worker index the message was enqueued on. Fails with
    /// [`PinpoolError::Cancelled`] if shutdown interrupts the wait for a free
    /// worker; the message is dropped in that case.
    pub fn dispatch(&mut self, message: Message) -> Result<WorkerIndex> {
        let client_id = message.client_id();
        let availability = &self.availability;
        let shutdown = &self.shutdown;

        let assignment = self.map.get_or_assign(client_id, || {
            let waiting = Instant::now();
            let index = availability.take(shutdown)?;
            METRICS
                .dispatcher
                .availability_wait
                .observe(waiting.elapsed().as_secs_f64());
            Ok::<_, PinpoolError>(index)
        })?;

        let index = assignment.index();
        if let Assignment::New(_) = assignment {
            METRICS.dispatcher.clients_pinned.inc();
            debug!("Pinned client {} to worker {}", client_id, index);
        }

        let queue = self.queues.get(index).ok_or_else(|| {
            PinpoolError::internal(format!("worker index {} out of range", index))
        })?;
        queue.push(message)?;
        METRICS.dispatcher.messages_dispatched.inc();

        Ok(index)
    }

    /// Worker the client is pinned to, if any
    pub fn pinned_worker(&self, client_id: ClientId) -> Option<WorkerIndex> {
        self.map.get(client_id)
    }

    pub fn pool_size(&self) -> usize {
        self.queues.len()
    }

    /// Dispatch messages from `incoming` until it is exhausted or shutdown
    /// fires
    ///
    /// Dropping the dispatcher on return closes every dedicated queue, which
    /// lets the workers drain what is left and exit.
    pub fn run(mut self, incoming: Receiver<Message>) -> DispatchReport {
        info!("Dispatcher started with {} workers", self.pool_size());

        let mut report = DispatchReport::default();

        let stop_reason = loop {
            if self.shutdown.is_triggered() {
                break StopReason::ShutdownRequested;
            }

            let next = select! {
                recv(incoming) -> message => match message {
                    Ok(message) => Next::Message(message),
                    Err(_) => Next::Exhausted,
                },
                recv(self.shutdown.receiver()) -> _ => Next::Shutdown,
            };

            let message = match next {
                Next::Message(message) => message,
                Next::Exhausted => break StopReason::StreamExhausted,
                Next::Shutdown => break StopReason::ShutdownRequested,
            };

            let client_id = message.client_id();
            match self.dispatch(message) {
                Ok(_) => report.dispatched += 1,
                Err(e) if e.is_cancellation() => {
                    report.dropped += 1;
                    METRICS.dispatcher.messages_dropped.inc();
                    info!(
                        "Shutdown while assigning client {}, message dropped",
                        client_id
                    );
                    break StopReason::ShutdownRequested;
                }
                Err(e) => {
                    report.dropped += 1;
                    METRICS.dispatcher.messages_dropped.inc();
                    error!("Failed to dispatch message for client {}: {}", client_id, e);
                }
            }
        };

        report.stop_reason = stop_reason;
        report.pinnings = self.map.snapshot();
        info!(
            "Incoming message dispatch stopped ({:?}): dispatched={} dropped={} clients={}",
            report.stop_reason,
            report.dispatched,
            report.dropped,
            report.pinnings.len()
        );
        report
    }
}
