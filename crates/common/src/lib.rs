//! Pinpool common library
//!
//! This crate contains the types shared by the dispatcher and the worker pool:
//! messages, errors, configuration, metrics and the signaling channels.

pub mod availability;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod shutdown;

// Re-export commonly used types
pub use availability::AvailabilityChannel;
pub use config::PinpoolConfig;
pub use error::{PinpoolError, Result};
pub use message::{ClientId, Message, WorkerIndex};
pub use metrics::{MetricsRegistry, METRICS};
pub use shutdown::ShutdownSignal;
