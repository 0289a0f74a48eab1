//! # Messaging Error Types
//!
//! Broker-side and dispatch-side failures, kept separate so a worker can tell a
//! fatal receive error from a per-message processing failure.

use thiserror::Error;

/// Broker receiver failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReceiverError {
    #[error("Broker unreachable: {message}")]
    Unreachable { message: String },

    #[error("Receiver closed: {message}")]
    Closed { message: String },

    #[error("Settlement failed for message {message_id}: {message}")]
    Settlement { message_id: String, message: String },

    #[error("Receiver operation cancelled")]
    Cancelled,

    #[error("Internal receiver error: {message}")]
    Internal { message: String },
}

impl ReceiverError {
    /// Create a broker unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// Create a receiver closed error
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Per-message processing failure; never fatal to a worker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Workflow runtime rejected message {message_id}: {message}")]
    Rejected { message_id: String, message: String },
}

impl DispatchError {
    /// Create a rejected error
    pub fn rejected(message_id: impl ToString, message: impl Into<String>) -> Self {
        Self::Rejected {
            message_id: message_id.to_string(),
            message: message.into(),
        }
    }
}
