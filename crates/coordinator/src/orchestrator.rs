//! Orchestrator: wires the pool together and owns its lifecycle
//!
//! ```text
//! Created --start()--> Running --shutdown / stream exhausted--> Draining --await_termination()--> Stopped
//! ```
//!
//! Two independent signals drive shutdown:
//!
//! - `shutdown` stops the dispatcher. Its exit closes every dedicated queue,
//!   so workers finish whatever is queued and then stop on their own.
//! - `cancel` stops the workers. It only fires when the pool outlives the
//!   timeout given to [`Orchestrator::await_termination`]; queued messages
//!   are abandoned and counted in the returned [`TerminationReport`].
//!
//! The timeout covers the whole wait. A dispatcher still reading an open
//! stream when it runs out is stopped through `shutdown` as well.

use crate::dispatcher::{DispatchReport, Dispatcher, StopReason};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use pinpool_common::{
    AvailabilityChannel, Message, PinpoolConfig, PinpoolError, Result, ShutdownSignal,
    WorkerIndex,
};
use pinpool_worker::{dedicated_queue, handler_from_config, MessageHandler, Worker, WorkerReport};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Drain timeout used by [`Orchestrator::shutdown`] unless configured
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of an [`Orchestrator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Outcome of a completed shutdown
#[derive(Debug, Clone, Serialize)]
pub struct TerminationReport {
    pub dispatch: DispatchReport,

    /// One entry per worker, ordered by index
    pub workers: Vec<WorkerReport>,

    /// Whether the timeout elapsed and the pool was stopped early
    pub forced: bool,
}

impl TerminationReport {
    /// Messages handled successfully across all workers
    pub fn handled(&self) -> u64 {
        self.workers.iter().map(|w| w.handled).sum()
    }

    /// Handler failures across all workers
    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }

    /// Messages left queued when workers were cancelled
    pub fn abandoned(&self) -> u64 {
        self.workers.iter().map(|w| w.abandoned).sum()
    }

    /// Every message taken from the stream reached the handler
    pub fn is_complete(&self) -> bool {
        !self.forced && self.abandoned() == 0 && self.dispatch.dropped == 0
    }
}

struct Threads {
    dispatcher: JoinHandle<DispatchReport>,
    dispatcher_done: Receiver<()>,
    workers: Vec<JoinHandle<WorkerReport>>,
    finished: Receiver<WorkerIndex>,
}

/// Owns the dispatcher thread, the worker threads and their shared channels
pub struct Orchestrator {
    pool_size: usize,
    shutdown_timeout: Duration,
    handler: Arc<dyn MessageHandler>,
    shutdown: ShutdownSignal,
    cancel: ShutdownSignal,
    state: Arc<Mutex<LifecycleState>>,
    threads: Mutex<Option<Threads>>,
}

impl Orchestrator {
    /// Create an orchestrator for `pool_size` workers sharing `handler`
    pub fn new(pool_size: usize, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        if pool_size == 0 {
            return Err(PinpoolError::invalid_input("pool size must be positive"));
        }

        Ok(Self {
            pool_size,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            handler,
            shutdown: ShutdownSignal::new(),
            cancel: ShutdownSignal::new(),
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            threads: Mutex::new(None),
        })
    }

    /// Create an orchestrator with the configured pool, timeout and handler
    pub fn from_config(config: &PinpoolConfig) -> Result<Self> {
        config.validate()?;
        let handler = handler_from_config(&config.handler);
        Ok(Self::new(config.pool.size, handler)?.with_shutdown_timeout(config.shutdown_timeout()))
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Spawn the workers and the dispatcher reading from `incoming`
    pub fn start(&self, incoming: Receiver<Message>) -> Result<()> {
        let mut threads = self.threads.lock();
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Created {
                return Err(PinpoolError::invalid_state(format!(
                    "cannot start from {:?}",
                    *state
                )));
            }
            *state = LifecycleState::Running;
        }

        match self.spawn(incoming) {
            Ok(spawned) => {
                *threads = Some(spawned);
                info!("Started {} workers and the dispatcher", self.pool_size);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start worker pool: {}", e);
                // Whatever did start winds down on its own once these fire.
                self.shutdown.trigger();
                self.cancel.trigger();
                *self.state.lock() = LifecycleState::Stopped;
                Err(e)
            }
        }
    }

    fn spawn(&self, incoming: Receiver<Message>) -> Result<Threads> {
        let availability = AvailabilityChannel::new(self.pool_size)?;
        let (finished_tx, finished) = channel::bounded(self.pool_size);

        let mut senders = Vec::with_capacity(self.pool_size);
        let mut workers = Vec::with_capacity(self.pool_size);

        for index in 0..self.pool_size {
            let (tx, rx) = dedicated_queue(index);
            senders.push(tx);

            let worker = Worker::new(
                rx,
                availability.clone(),
                Arc::clone(&self.handler),
                self.cancel.clone(),
            );
            let finished_tx = finished_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("pinpool-worker-{}", index))
                .spawn(move || {
                    let report = worker.run();
                    let _ = finished_tx.send(report.index);
                    report
                })?;
            workers.push(handle);
        }
        drop(finished_tx);

        let dispatcher = Dispatcher::new(senders, availability, self.shutdown.clone())?;
        let state = Arc::clone(&self.state);
        let (done_tx, dispatcher_done) = channel::bounded(1);
        let dispatcher = thread::Builder::new()
            .name("pinpool-dispatcher".to_string())
            .spawn(move || {
                let report = dispatcher.run(incoming);
                {
                    let mut state = state.lock();
                    if *state == LifecycleState::Running {
                        *state = LifecycleState::Draining;
                    }
                }
                let _ = done_tx.send(());
                report
            })?;

        Ok(Threads {
            dispatcher,
            dispatcher_done,
            workers,
            finished,
        })
    }

    /// Ask the dispatcher to stop; idempotent
    ///
    /// Workers keep draining their queues. Requesting shutdown before
    /// [`start`](Self::start) moves straight to `Stopped`.
    pub fn request_shutdown(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Created => *state = LifecycleState::Stopped,
                LifecycleState::Running => *state = LifecycleState::Draining,
                LifecycleState::Draining | LifecycleState::Stopped => {}
            }
        }

        if self.shutdown.trigger() {
            info!("Shutdown requested");
        }
    }

    /// Wait for the pool to stop and report what happened
    ///
    /// Waits up to `timeout` for the dispatcher to stop (stream exhausted or
    /// [`request_shutdown`](Self::request_shutdown) called) and for the
    /// workers to drain their queues. When the deadline passes first, the
    /// dispatcher is told to stop and the workers are cancelled: their
    /// in-flight handler call completes, and every message still queued is
    /// abandoned and counted in the report.
    pub fn await_termination(&self, timeout: Duration) -> Result<TerminationReport> {
        let deadline = Instant::now().checked_add(timeout);
        let threads = self.threads.lock().take();
        let Threads {
            dispatcher,
            dispatcher_done,
            workers,
            finished,
        } = threads.ok_or_else(|| match self.state() {
            LifecycleState::Created => PinpoolError::invalid_state("orchestrator was never started"),
            _ => PinpoolError::invalid_state("termination was already awaited"),
        })?;

        let mut forced = !wait_until(&dispatcher_done, deadline);
        if forced {
            warn!(
                "Dispatcher still running after {:?}, stopping it and cancelling workers",
                timeout
            );
            self.request_shutdown();
            self.cancel.trigger();
        }

        let dispatch = dispatcher.join().unwrap_or_else(|_| {
            error!("Dispatcher thread panicked");
            DispatchReport {
                stop_reason: StopReason::Panicked,
                ..DispatchReport::default()
            }
        });

        if !forced {
            info!(
                "Draining {} workers (timeout {:?})",
                workers.len(),
                timeout
            );

            forced = !wait_for_workers(&finished, workers.len(), deadline);
            if forced {
                warn!(
                    "Workers still busy after {:?}, cancelling remaining work",
                    timeout
                );
                self.cancel.trigger();
            }
        }

        let workers: Vec<WorkerReport> = workers
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle.join().unwrap_or_else(|_| {
                    error!("Worker {} thread panicked", index);
                    WorkerReport {
                        index,
                        ..WorkerReport::default()
                    }
                })
            })
            .collect();

        *self.state.lock() = LifecycleState::Stopped;

        let report = TerminationReport {
            dispatch,
            workers,
            forced,
        };

        if report.abandoned() > 0 {
            warn!(
                "Worker pool stopped, {} queued messages abandoned",
                report.abandoned()
            );
        }
        info!(
            "Worker pool stopped: handled={} failed={} abandoned={} dropped={}",
            report.handled(),
            report.failed(),
            report.abandoned(),
            report.dispatch.dropped
        );

        Ok(report)
    }

    /// Request shutdown and wait using the configured drain timeout
    pub fn shutdown(&self) -> Result<TerminationReport> {
        self.request_shutdown();
        self.await_termination(self.shutdown_timeout)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(threads) = self.threads.get_mut() {
            debug!(
                "Orchestrator dropped while running, cancelling the dispatcher and detaching {} worker threads",
                threads.workers.len()
            );
            self.shutdown.trigger();
            self.cancel.trigger();
        }
    }
}

/// Receive one completion before `deadline`; `None` waits forever
fn recv_until<T>(
    done: &Receiver<T>,
    deadline: Option<Instant>,
) -> std::result::Result<T, RecvTimeoutError> {
    match deadline {
        Some(deadline) => done.recv_deadline(deadline),
        None => done.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

/// Wait for the dispatcher to stop; returns `false` on timeout
fn wait_until(dispatcher_done: &Receiver<()>, deadline: Option<Instant>) -> bool {
    // Disconnected means the dispatcher died without reporting; joining it surfaces that.
    !matches!(
        recv_until(dispatcher_done, deadline),
        Err(RecvTimeoutError::Timeout)
    )
}

/// Wait for `count` worker completions; returns `false` on timeout
fn wait_for_workers(
    finished: &Receiver<WorkerIndex>,
    count: usize,
    deadline: Option<Instant>,
) -> bool {
    for _ in 0..count {
        match recv_until(finished, deadline) {
            Ok(index) => debug!("Worker {} finished draining", index),
            // A worker died without reporting; joining it will surface that.
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::replay_client_ids;

    fn noop_handler() -> Arc<dyn MessageHandler> {
        Arc::new(|_: &Message, _: WorkerIndex| -> anyhow::Result<()> { Ok(()) })
    }

    #[test]
    fn test_zero_pool_rejected() {
        assert!(Orchestrator::new(0, noop_handler()).is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let orchestrator = Orchestrator::new(2, noop_handler()).unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Created);

        let (_source, rx) = crate::source::MessageSource::unbounded();
        orchestrator.start(rx).unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Running);

        orchestrator.request_shutdown();
        orchestrator.request_shutdown();
        assert_eq!(orchestrator.state(), LifecycleState::Draining);

        let report = orchestrator.await_termination(Duration::from_secs(5)).unwrap();
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
        assert_eq!(report.dispatch.stop_reason, StopReason::ShutdownRequested);
        assert!(report.is_complete());
    }

    #[test]
    fn test_start_twice_rejected() {
        let orchestrator = Orchestrator::new(1, noop_handler()).unwrap();
        orchestrator.start(replay_client_ids(&[1])).unwrap();

        let err = orchestrator.start(replay_client_ids(&[2])).unwrap_err();
        assert!(matches!(err, PinpoolError::InvalidState(_)));

        orchestrator.shutdown().unwrap();
    }

    #[test]
    fn test_await_before_start_rejected() {
        let orchestrator = Orchestrator::new(1, noop_handler()).unwrap();

        assert!(orchestrator.await_termination(Duration::ZERO).is_err());
    }

    #[test]
    fn test_shutdown_before_start_stops() {
        let orchestrator = Orchestrator::new(1, noop_handler()).unwrap();
        orchestrator.request_shutdown();

        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
        assert!(orchestrator.start(replay_client_ids(&[1])).is_err());
    }

    #[test]
    fn test_exhausted_stream_drains_everything() {
        let orchestrator = Orchestrator::new(3, noop_handler()).unwrap();
        orchestrator
            .start(replay_client_ids(&[1, 2, 3, 1, 5, 4, 3, 7, 8, 1, 3, 5]))
            .unwrap();

        let report = orchestrator.await_termination(Duration::from_secs(5)).unwrap();

        assert_eq!(report.dispatch.stop_reason, StopReason::StreamExhausted);
        assert_eq!(report.dispatch.dispatched, 12);
        assert_eq!(report.handled(), 12);
        assert_eq!(report.dispatch.pinnings.len(), 7);
        assert!(report.is_complete());
        assert!(orchestrator.await_termination(Duration::ZERO).is_err());
    }

    #[test]
    fn test_timeout_stops_open_stream() {
        let orchestrator = Orchestrator::new(2, noop_handler()).unwrap();
        let (source, rx) = crate::source::MessageSource::unbounded();
        orchestrator.start(rx).unwrap();
        source.submit(Message::new(1, serde_json::json!({}))).unwrap();

        let started = Instant::now();
        let report = orchestrator
            .await_termination(Duration::from_millis(50))
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(report.forced);
        assert_eq!(report.dispatch.stop_reason, StopReason::ShutdownRequested);
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
        drop(source);
    }

    #[test]
    fn test_drop_while_running_stops_dispatcher() {
        let orchestrator = Orchestrator::new(2, noop_handler()).unwrap();
        let (source, rx) = crate::source::MessageSource::unbounded();
        orchestrator.start(rx).unwrap();

        drop(orchestrator);

        let deadline = Instant::now() + Duration::from_secs(2);
        while source.submit(Message::empty(1)).is_ok() {
            assert!(Instant::now() < deadline, "dispatcher still reading after drop");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_from_config() {
        let mut config = PinpoolConfig::default();
        config.pool.size = 4;
        config.pool.shutdown_timeout_ms = 250;

        let orchestrator = Orchestrator::from_config(&config).unwrap();

        assert_eq!(orchestrator.pool_size(), 4);
        assert_eq!(orchestrator.shutdown_timeout(), Duration::from_millis(250));
    }
}
