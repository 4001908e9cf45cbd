//! Pinpool Coordinator
//!
//! Routes a stream of client-tagged messages onto a fixed pool of workers so
//! that each client's messages are handled in submission order while
//! different clients proceed in parallel.

pub mod dispatch_map;
pub mod dispatcher;
pub mod orchestrator;
pub mod source;

pub use dispatch_map::{Assignment, DispatchMap};
pub use dispatcher::{DispatchReport, Dispatcher, StopReason};
pub use orchestrator::{LifecycleState, Orchestrator, TerminationReport, DEFAULT_SHUTDOWN_TIMEOUT};
pub use source::{replay, replay_client_ids, MessageSource};
