//! Common error types for Pinpool
//!
//! This module defines all error types used across the dispatch engine.
//! Handler failures are deliberately absent: they are local to a single
//! message and never leave the worker that observed them.

use thiserror::Error;

/// Main error type for Pinpool
#[derive(Error, Debug)]
pub enum PinpoolError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A blocking wait was interrupted by the shutdown signal
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The other end of an internal channel went away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PinpoolError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PinpoolError::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PinpoolError::InvalidInput(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        PinpoolError::InvalidState(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        PinpoolError::Cancelled(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        PinpoolError::ChannelClosed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        PinpoolError::Internal(msg.into())
    }

    /// Whether this error is a graceful stop rather than a fault
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PinpoolError::Cancelled(_))
    }
}

/// Result type alias for Pinpool operations
pub type Result<T> = std::result::Result<T, PinpoolError>;
