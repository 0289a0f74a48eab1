//! # Models
//!
//! Value types shared across discovery, workers and the pool.

pub mod message;
pub mod subscription_key;
pub mod workflow_definition;

pub use message::ReceivedMessage;
pub use subscription_key::{DiscoveredSubscriptionSet, SubscriptionKey};
pub use workflow_definition::{ActivityDefinition, PropertyExpression, WorkflowDefinition};
