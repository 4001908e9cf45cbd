//! Pluggable message handlers
//!
//! The dispatch engine treats the handler as opaque: it is called once per
//! message, sequentially within a worker and concurrently across workers. A
//! returned error (or a panic) only affects the message being handled.

use anyhow::{bail, Result};
use pinpool_common::config::{HandlerConfig, HandlerKind};
use pinpool_common::{ClientId, Message, WorkerIndex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Unit of work performed for each message
pub trait MessageHandler: Send + Sync {
    /// Process one message on behalf of worker `worker`
    fn handle(&self, message: &Message, worker: WorkerIndex) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message, WorkerIndex) -> Result<()> + Send + Sync,
{
    fn handle(&self, message: &Message, worker: WorkerIndex) -> Result<()> {
        self(message, worker)
    }
}

/// Fixed-duration simulated task
///
/// Logs `START`, sleeps, then logs `END` whether or not the message failed.
#[derive(Debug, Clone)]
pub struct SimulatedHandler {
    duration: Duration,
    fail_clients: HashSet<ClientId>,
}

impl SimulatedHandler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail_clients: HashSet::new(),
        }
    }

    /// Make every message from these clients fail after its simulated work
    pub fn failing_for(mut self, clients: impl IntoIterator<Item = ClientId>) -> Self {
        self.fail_clients.extend(clients);
        self
    }
}

impl MessageHandler for SimulatedHandler {
    fn handle(&self, message: &Message, worker: WorkerIndex) -> Result<()> {
        let client_id = message.client_id();
        info!("worker #{} - START - client {}", worker, client_id);

        std::thread::sleep(self.duration);
        let outcome = if self.fail_clients.contains(&client_id) {
            Err(anyhow::anyhow!("simulated failure for client {}", client_id))
        } else {
            Ok(())
        };

        info!("worker #{} - END - client {}", worker, client_id);
        outcome
    }
}

/// Handler that only logs the message
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler {
    fail_clients: HashSet<ClientId>,
}

impl LoggingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, clients: impl IntoIterator<Item = ClientId>) -> Self {
        self.fail_clients.extend(clients);
        self
    }
}

impl MessageHandler for LoggingHandler {
    fn handle(&self, message: &Message, worker: WorkerIndex) -> Result<()> {
        if self.fail_clients.contains(&message.client_id()) {
            bail!("rejected message for client {}", message.client_id());
        }
        info!(
            "worker #{} - client {} - payload {}",
            worker,
            message.client_id(),
            message.payload()
        );
        Ok(())
    }
}

/// Build the handler selected by configuration
pub fn handler_from_config(config: &HandlerConfig) -> Arc<dyn MessageHandler> {
    let failing = config.fail_client_ids.iter().copied();
    match config.kind {
        HandlerKind::Simulated => Arc::new(
            SimulatedHandler::new(config.duration()).failing_for(failing),
        ),
        HandlerKind::Logging => Arc::new(LoggingHandler::new().failing_for(failing)),
    }
}
