//! Pinpool Worker
//!
//! The consuming side of the dispatch engine: per-worker dedicated queues,
//! the pluggable message handler, and the loop that drains one queue on its
//! own OS thread.

pub mod handler;
pub mod queue;
pub mod worker;

pub use handler::{handler_from_config, LoggingHandler, MessageHandler, SimulatedHandler};
pub use queue::{dedicated_queue, DedicatedReceiver, DedicatedSender, Take};
pub use worker::{Worker, WorkerReport};
