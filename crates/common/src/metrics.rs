//! Metrics collection for Pinpool
//!
//! This module provides Prometheus metrics for observability. Nothing in the
//! dispatch engine reads these values back; they exist purely for operators.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics registry for Pinpool
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub dispatcher: DispatcherMetrics,
    pub worker: WorkerMetrics,
}

/// Dispatcher-side metrics
#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    /// Messages appended to a dedicated queue
    pub messages_dispatched: IntCounter,

    /// Distinct clients pinned to a worker
    pub clients_pinned: IntGauge,

    /// Time spent blocked waiting for an available worker
    pub availability_wait: Histogram,

    /// Messages dropped because shutdown interrupted their assignment
    pub messages_dropped: IntCounter,
}

/// Worker-side metrics
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Handler invocations that returned successfully
    pub messages_handled: IntCounter,

    /// Handler invocations that failed or panicked
    pub handler_failures: IntCounter,

    /// Handler duration
    pub handler_duration: Histogram,

    /// Handler invocations currently running
    pub in_flight: IntGauge,

    /// Current depth of each dedicated queue
    pub queue_depth: IntGaugeVec,

    /// Availability publications accepted
    pub availability_published: IntCounter,

    /// Availability publications dropped because the channel was full
    pub availability_dropped: IntCounter,

    /// Messages left in a queue when its worker was force-cancelled
    pub messages_abandoned: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        // Dispatcher metrics
        let messages_dispatched = IntCounter::new(
            "dispatcher_messages_dispatched_total",
            "Total number of messages appended to a dedicated queue",
        )?;

        let clients_pinned = IntGauge::new(
            "dispatcher_clients_pinned",
            "Number of distinct clients pinned to a worker",
        )?;

        let availability_wait = Histogram::with_opts(
            HistogramOpts::new(
                "dispatcher_availability_wait_seconds",
                "Time spent waiting for an available worker",
            )
            .buckets(vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        let messages_dropped = IntCounter::new(
            "dispatcher_messages_dropped_total",
            "Messages dropped because shutdown interrupted their assignment",
        )?;

        // Worker metrics
        let messages_handled = IntCounter::new(
            "worker_messages_handled_total",
            "Total number of messages handled successfully",
        )?;

        let handler_failures = IntCounter::new(
            "worker_handler_failures_total",
            "Total number of failed handler invocations",
        )?;

        let handler_duration = Histogram::with_opts(
            HistogramOpts::new(
                "worker_handler_duration_seconds",
                "Handler invocation duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let in_flight = IntGauge::new(
            "worker_handlers_in_flight",
            "Current number of running handler invocations",
        )?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("worker_queue_depth", "Current depth of each dedicated queue"),
            &["worker"],
        )?;

        let availability_published = IntCounter::new(
            "worker_availability_published_total",
            "Availability publications accepted",
        )?;

        let availability_dropped = IntCounter::new(
            "worker_availability_dropped_total",
            "Availability publications dropped on a full channel",
        )?;

        let messages_abandoned = IntCounter::new(
            "worker_messages_abandoned_total",
            "Messages left queued when a worker was force-cancelled",
        )?;

        // Register all metrics
        registry.register(Box::new(messages_dispatched.clone()))?;
        registry.register(Box::new(clients_pinned.clone()))?;
        registry.register(Box::new(availability_wait.clone()))?;
        registry.register(Box::new(messages_dropped.clone()))?;

        registry.register(Box::new(messages_handled.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(handler_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(availability_published.clone()))?;
        registry.register(Box::new(availability_dropped.clone()))?;
        registry.register(Box::new(messages_abandoned.clone()))?;

        let dispatcher = DispatcherMetrics {
            messages_dispatched,
            clients_pinned,
            availability_wait,
            messages_dropped,
        };

        let worker = WorkerMetrics {
            messages_handled,
            handler_failures,
            handler_duration,
            in_flight,
            queue_depth,
            availability_published,
            availability_dropped,
            messages_abandoned,
        };

        Ok(MetricsRegistry {
            registry,
            dispatcher,
            worker,
        })
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
