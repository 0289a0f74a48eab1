//! # Messaging Module
//!
//! Boundary traits for the broker client and the workflow runtime:
//!
//! - [`ReceiverFactory`] acquires and releases [`ReceiverHandle`]s bound to one
//!   (topic, subscription) pair.
//! - [`ReceiverHandle`] pulls and settles messages.
//! - [`MessageDispatcher`] hands a received message to the workflow runtime.
//!
//! [`InMemoryBroker`] implements the factory side for embedded use and tests.

pub mod errors;
pub mod in_memory;

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::models::{ReceivedMessage, SubscriptionKey};

pub use errors::{DispatchError, ReceiverError};
pub use in_memory::InMemoryBroker;

/// Opaque receiver bound to a single subscription
#[async_trait]
pub trait ReceiverHandle: Send + Sync + fmt::Debug {
    fn key(&self) -> &SubscriptionKey;

    /// Wait for the next message.
    ///
    /// `Ok(None)` means the wait window elapsed without a message. Must be
    /// cancel-safe: dropping the future must not lose a message.
    async fn receive(&self) -> Result<Option<ReceivedMessage>, ReceiverError>;

    /// Acknowledge a processed message
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), ReceiverError>;

    /// Return a message to the broker for redelivery
    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), ReceiverError>;
}

/// Creates and disposes receivers
#[async_trait]
pub trait ReceiverFactory: Send + Sync {
    async fn acquire(
        &self,
        key: &SubscriptionKey,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ReceiverHandle>, ReceiverError>;

    async fn release(&self, handle: Box<dyn ReceiverHandle>) -> Result<(), ReceiverError>;
}

/// Sink that forwards messages to the workflow runtime
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        key: &SubscriptionKey,
        message: &ReceivedMessage,
    ) -> Result<(), DispatchError>;
}
