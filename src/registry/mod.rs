//! # Workflow Registry and Blueprint Reflection
//!
//! Boundary traits for the external workflow definition registry and the
//! reflector that turns a definition into a navigable [`WorkflowBlueprint`].
//!
//! ## Architecture
//!
//! ```text
//! WorkflowRegistry::list() ──► stream of WorkflowDefinition
//!                                   │
//!                                   ▼
//!                    BlueprintReflector::reflect(definition)
//!                                   │
//!                                   ▼
//!                 WorkflowBlueprint ──► activities_of_type(trigger)
//! ```

pub mod in_memory;
pub mod reflector;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::ResolutionError;
use crate::models::{PropertyExpression, WorkflowDefinition};

pub use in_memory::InMemoryWorkflowRegistry;
pub use reflector::DefinitionBlueprintReflector;

/// Registry access failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Registry unavailable: {message}")]
    Unavailable { message: String },

    #[error("Registry query failed: {message}")]
    Query { message: String },

    #[error("Registry listing cancelled")]
    Cancelled,
}

impl RegistryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }
}

/// Stream of definitions returned by a registry query
pub type DefinitionStream = BoxStream<'static, Result<WorkflowDefinition, RegistryError>>;

/// Source of registered workflow definitions
#[async_trait]
pub trait WorkflowRegistry: Send + Sync {
    /// List every registered definition.
    ///
    /// Implementations backed by paged storage should yield pages lazily rather
    /// than materializing the full corpus.
    async fn list(&self, cancel: &CancellationToken) -> Result<DefinitionStream, RegistryError>;
}

/// Resolves a definition into a navigable blueprint
#[async_trait]
pub trait BlueprintReflector: Send + Sync {
    async fn reflect(
        &self,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<WorkflowBlueprint, ResolutionError>;
}

/// Resolved activity, ready for property resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityBlueprint {
    pub activity_id: String,
    pub activity_type: String,
    pub properties: HashMap<String, PropertyExpression>,
}

/// Navigable form of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBlueprint {
    pub definition_id: String,
    pub version: i32,
    pub activities: Vec<ActivityBlueprint>,
    pub variables: HashMap<String, serde_json::Value>,
}

impl WorkflowBlueprint {
    /// Activities whose type matches `activity_type`, in declaration order
    pub fn activities_of_type<'a>(
        &'a self,
        activity_type: &'a str,
    ) -> impl Iterator<Item = &'a ActivityBlueprint> + 'a {
        self.activities
            .iter()
            .filter(move |activity| activity.activity_type == activity_type)
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }
}
