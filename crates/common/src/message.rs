//! Message and identifier types

use serde::{Deserialize, Serialize};

/// Client identifier; messages sharing one are processed in submission order
pub type ClientId = u64;

/// Index of a worker slot and its dedicated queue, in `[0, pool_size)`
pub type WorkerIndex = usize;

/// A single client-tagged message
///
/// The payload is opaque to the dispatch engine and only ever read by the
/// handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    client_id: ClientId,
    payload: serde_json::Value,
}

impl Message {
    /// Create a message carrying a payload
    pub fn new(client_id: ClientId, payload: serde_json::Value) -> Self {
        Self { client_id, payload }
    }

    /// Create a message with no payload
    pub fn empty(client_id: ClientId) -> Self {
        Self::new(client_id, serde_json::Value::Null)
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
