//! # Orchestrator Error Types
//!
//! Structured error taxonomy for subscription discovery, worker lifecycle and
//! reconciliation. Per-item failures (one definition, one key, one message) are
//! contained by the component that hits them; only pass-level failures reach the
//! caller of [`WorkerPool::reconcile`](crate::orchestration::WorkerPool::reconcile).

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::{DispatchError, ReceiverError};
use crate::models::SubscriptionKey;
use crate::orchestration::ReconciliationSummary;
use crate::registry::RegistryError;

/// Pass-level discovery failure. The reconciliation that hit it ends with an empty pool.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Workflow registry failure: {0}")]
    Registry(RegistryError),

    #[error("Property resolution engine unavailable: {message}")]
    ResolutionEngineUnavailable { message: String },

    #[error("Trigger activity {activity_id} in workflow {definition_id} resolved an empty {property}")]
    InvalidSubscriptionKey {
        definition_id: String,
        activity_id: String,
        property: String,
    },

    #[error("Discovery cancelled")]
    Cancelled,
}

impl From<RegistryError> for DiscoveryError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::Cancelled => Self::Cancelled,
            other => Self::Registry(other),
        }
    }
}

/// Failure to resolve one workflow definition. Excludes that definition from the
/// discovered set without aborting the pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Failed to reflect workflow {definition_id}: {message}")]
    Reflection {
        definition_id: String,
        message: String,
    },

    #[error("Failed to resolve property {property} on activity {activity_id}: {message}")]
    Property {
        activity_id: String,
        property: String,
        message: String,
    },

    #[error("Activity {activity_id} property {property} resolved to an empty value")]
    EmptyProperty {
        activity_id: String,
        property: String,
    },

    #[error("Unsupported {language} expression on activity {activity_id} property {property}")]
    UnsupportedExpression {
        activity_id: String,
        property: String,
        language: String,
    },

    #[error("Variable {variable} referenced by activity {activity_id} is not defined")]
    MissingVariable {
        activity_id: String,
        variable: String,
    },

    #[error("Resolution engine unavailable: {message}")]
    EngineUnavailable { message: String },

    #[error("Resolution cancelled")]
    Cancelled,
}

impl ResolutionError {
    /// Create a reflection error
    pub fn reflection(definition_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reflection {
            definition_id: definition_id.into(),
            message: message.into(),
        }
    }

    /// Create a property resolution error
    pub fn property(
        activity_id: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Property {
            activity_id: activity_id.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Create an engine unavailable error
    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            message: message.into(),
        }
    }
}

/// Worker lifecycle failures
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Receive failed for {key}: {source}")]
    Receive {
        key: SubscriptionKey,
        #[source]
        source: ReceiverError,
    },

    #[error("No async runtime available to start worker for {key}")]
    RuntimeUnavailable { key: SubscriptionKey },

    #[error("Stop of worker for {key} was cancelled before the worker drained")]
    StopCancelled { key: SubscriptionKey },

    #[error("Worker for {key} exited without reporting a stopped state")]
    Lost { key: SubscriptionKey },
}

/// Caller-facing reconciliation outcome errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Discovery failed after tearing down {torn_down} workers: {source}")]
    Discovery {
        torn_down: usize,
        #[source]
        source: DiscoveryError,
    },

    #[error("Another reconciliation is already in progress")]
    InProgress,

    #[error("Reconciliation cancelled ({} workers torn down, {} started)", .summary.torn_down, .summary.started)]
    Cancelled { summary: Box<ReconciliationSummary> },

    #[error("Worker pool has been shut down")]
    ShutDown,
}

/// Crate-level error wrapping every component error
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
