//! End-to-end ordering, pinning and shutdown behaviour of the worker pool.

use anyhow::bail;
use parking_lot::Mutex;
use pinpool_common::{AvailabilityChannel, ClientId, Message, ShutdownSignal, WorkerIndex};
use pinpool_coordinator::{
    replay_client_ids, LifecycleState, MessageSource, Orchestrator, StopReason,
};
use pinpool_worker::MessageHandler;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SCENARIO: [ClientId; 12] = [1, 2, 3, 1, 5, 4, 3, 7, 8, 1, 3, 5];

#[derive(Debug, Clone, Copy)]
struct Invocation {
    client_id: ClientId,
    seq: u64,
    worker: WorkerIndex,
}

/// Handler that records every invocation in start order
struct Recorder {
    invocations: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    fail_seq: Option<u64>,
}

impl Recorder {
    fn new(delay: Duration) -> Arc<Self> {
        Self::failing_at(delay, None)
    }

    fn failing_at(delay: Duration, fail_seq: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay,
            fail_seq,
        })
    }

    fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    fn by_client(&self) -> BTreeMap<ClientId, Vec<Invocation>> {
        let mut grouped: BTreeMap<ClientId, Vec<Invocation>> = BTreeMap::new();
        for invocation in self.invocations() {
            grouped.entry(invocation.client_id).or_default().push(invocation);
        }
        grouped
    }
}

impl MessageHandler for Recorder {
    fn handle(&self, message: &Message, worker: WorkerIndex) -> anyhow::Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let seq = message.payload()["seq"].as_u64().unwrap_or_default();
        self.invocations.lock().push(Invocation {
            client_id: message.client_id(),
            seq,
            worker,
        });

        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_seq == Some(seq) {
            bail!("refusing message {}", seq);
        }
        Ok(())
    }
}

fn submit_all(source: &MessageSource, client_ids: &[ClientId]) {
    for (seq, &client_id) in client_ids.iter().enumerate() {
        source
            .submit(Message::new(client_id, serde_json::json!({ "seq": seq })))
            .unwrap();
    }
}

#[test]
fn test_per_client_fifo_and_pinning() {
    let recorder = Recorder::new(Duration::from_millis(5));
    let orchestrator = Orchestrator::new(3, recorder.clone()).unwrap();

    orchestrator.start(replay_client_ids(&SCENARIO)).unwrap();
    let report = orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.handled(), SCENARIO.len() as u64);

    let by_client = recorder.by_client();
    for (client_id, invocations) in &by_client {
        let seqs: Vec<_> = invocations.iter().map(|i| i.seq).collect();
        let expected: Vec<_> = SCENARIO
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == client_id)
            .map(|(seq, _)| seq as u64)
            .collect();
        assert_eq!(seqs, expected, "client {} out of order", client_id);

        let pinned = report.dispatch.pinnings[client_id];
        assert!(
            invocations.iter().all(|i| i.worker == pinned),
            "client {} left worker {}",
            client_id,
            pinned
        );
    }

    assert_eq!(by_client[&1].len(), 3);
    assert_eq!(by_client[&3].len(), 3);
    assert_eq!(by_client[&5].len(), 2);
}

#[test]
fn test_single_worker_is_total_order() {
    let recorder = Recorder::new(Duration::from_millis(1));
    let orchestrator = Orchestrator::new(1, recorder.clone()).unwrap();

    orchestrator.start(replay_client_ids(&SCENARIO)).unwrap();
    orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    let seqs: Vec<_> = recorder.invocations().iter().map(|i| i.seq).collect();
    let expected: Vec<_> = (0..SCENARIO.len() as u64).collect();
    assert_eq!(seqs, expected);
}

#[test]
fn test_concurrency_bounded_by_pool_size() {
    let recorder = Recorder::new(Duration::from_millis(3));
    let orchestrator = Orchestrator::new(2, recorder.clone()).unwrap();
    let client_ids: Vec<ClientId> = (0..40).map(|i| i % 13).collect();

    orchestrator.start(replay_client_ids(&client_ids)).unwrap();
    let report = orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    assert_eq!(report.handled(), 40);
    assert!(recorder.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[test]
fn test_availability_never_exceeds_pool_size() {
    let availability = AvailabilityChannel::new(3).unwrap();
    let shutdown = ShutdownSignal::new();
    availability.take(&shutdown).unwrap();

    let publishers: Vec<_> = (0..3)
        .map(|index| {
            let availability = availability.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    availability.try_publish(index);
                    assert!(availability.len() <= 3);
                }
            })
        })
        .collect();

    for publisher in publishers {
        publisher.join().unwrap();
    }
    assert_eq!(availability.len(), 3);
}

#[test]
fn test_handler_failure_is_isolated() {
    let recorder = Recorder::failing_at(Duration::from_millis(1), Some(1));
    let orchestrator = Orchestrator::new(2, recorder.clone()).unwrap();

    orchestrator.start(replay_client_ids(&[1, 1, 1, 2])).unwrap();
    let report = orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.handled(), 3);
    let client_one: Vec<_> = recorder.by_client()[&1].iter().map(|i| i.seq).collect();
    assert_eq!(client_one, vec![0, 1, 2]);
}

#[test]
fn test_graceful_shutdown_drains_queues() {
    let recorder = Recorder::new(Duration::from_millis(20));
    let orchestrator = Orchestrator::new(2, recorder.clone()).unwrap();
    let (source, incoming) = MessageSource::unbounded();

    orchestrator.start(incoming).unwrap();
    submit_all(&source, &[1, 1, 1, 1, 1, 1]);
    thread::sleep(Duration::from_millis(50));

    orchestrator.request_shutdown();
    let report = orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    assert_eq!(report.dispatch.stop_reason, StopReason::ShutdownRequested);
    assert_eq!(report.dispatch.dispatched, 6);
    assert_eq!(report.handled(), 6);
    assert!(!report.forced);
    assert!(report.is_complete());
    assert_eq!(orchestrator.state(), LifecycleState::Stopped);
}

#[test]
fn test_shutdown_timeout_abandons_work() {
    let recorder = Recorder::new(Duration::from_millis(50));
    let orchestrator = Orchestrator::new(1, recorder.clone()).unwrap();
    let (source, incoming) = MessageSource::unbounded();

    orchestrator.start(incoming).unwrap();
    submit_all(&source, &[1; 10]);
    thread::sleep(Duration::from_millis(30));

    orchestrator.request_shutdown();
    let started = Instant::now();
    let report = orchestrator
        .await_termination(Duration::from_millis(1))
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(report.forced);
    assert!(report.abandoned() > 0);
    assert!(!report.is_complete());
    assert_eq!(
        report.handled() + report.failed() + report.abandoned(),
        report.dispatch.dispatched
    );
}

#[test]
fn test_shutdown_interrupts_waiting_assignment() {
    let recorder = Recorder::new(Duration::from_millis(200));
    let orchestrator = Orchestrator::new(1, recorder.clone()).unwrap();
    let (source, incoming) = MessageSource::unbounded();

    orchestrator.start(incoming).unwrap();
    // Client 2 cannot be pinned until worker 0 finishes client 1.
    submit_all(&source, &[1, 2]);
    thread::sleep(Duration::from_millis(50));

    orchestrator.request_shutdown();
    let report = orchestrator.await_termination(Duration::from_secs(10)).unwrap();

    assert_eq!(report.dispatch.stop_reason, StopReason::ShutdownRequested);
    assert_eq!(report.dispatch.dispatched, 1);
    assert_eq!(report.dispatch.dropped, 1);
    assert!(!report.dispatch.pinnings.contains_key(&2));
    assert_eq!(report.handled(), 1);
}

#[test]
fn test_await_termination_bounded_on_open_stream() {
    let recorder = Recorder::new(Duration::from_millis(5));
    let orchestrator = Orchestrator::new(2, recorder.clone()).unwrap();
    let (source, incoming) = MessageSource::unbounded();

    orchestrator.start(incoming).unwrap();
    submit_all(&source, &[1]);

    // The source stays open and nobody requests shutdown.
    let started = Instant::now();
    let report = orchestrator
        .await_termination(Duration::from_millis(50))
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.forced);
    assert_eq!(report.dispatch.stop_reason, StopReason::ShutdownRequested);
    assert_eq!(
        report.handled() + report.failed() + report.abandoned(),
        report.dispatch.dispatched
    );
    assert_eq!(orchestrator.state(), LifecycleState::Stopped);
    assert!(source.submit(Message::empty(2)).is_err());
}
