//! # In-Memory Workflow Registry
//!
//! DashMap-backed registry that broadcasts a [`DefinitionChange`] for every
//! upsert and removal. Used by the hosting layer in embedded deployments and by
//! the test suite.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DefinitionStream, RegistryError, WorkflowRegistry};
use crate::models::WorkflowDefinition;
use crate::orchestration::{ChangeKind, DefinitionChange};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct InMemoryWorkflowRegistry {
    definitions: DashMap<String, WorkflowDefinition>,
    changes: broadcast::Sender<DefinitionChange>,
    available: AtomicBool,
}

impl Default for InMemoryWorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            definitions: DashMap::new(),
            changes,
            available: AtomicBool::new(true),
        }
    }

    /// Insert or replace a definition and publish the change
    pub fn upsert(&self, definition: WorkflowDefinition) {
        let change = DefinitionChange {
            definition_id: definition.definition_id.clone(),
            kind: ChangeKind::Published,
            activity_types: Some(definition.activity_types()),
        };
        self.definitions
            .insert(definition.definition_id.clone(), definition);
        self.publish(change);
    }

    /// Remove a definition, returning it if it was registered
    pub fn remove(&self, definition_id: &str) -> Option<WorkflowDefinition> {
        let (_, removed) = self.definitions.remove(definition_id)?;
        self.publish(DefinitionChange {
            definition_id: removed.definition_id.clone(),
            kind: ChangeKind::Deleted,
            activity_types: Some(removed.activity_types()),
        });
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Subscribe to definition change notifications
    pub fn subscribe_changes(&self) -> broadcast::Receiver<DefinitionChange> {
        self.changes.subscribe()
    }

    /// Toggle availability; while unavailable every `list` call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn publish(&self, change: DefinitionChange) {
        // No receivers is fine: nothing is listening for changes yet
        if self.changes.send(change).is_err() {
            debug!("Definition change published with no subscribers");
        }
    }
}

#[async_trait]
impl WorkflowRegistry for InMemoryWorkflowRegistry {
    async fn list(&self, cancel: &CancellationToken) -> Result<DefinitionStream, RegistryError> {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(RegistryError::unavailable("in-memory registry marked unavailable"));
        }

        let mut snapshot: Vec<WorkflowDefinition> = self
            .definitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        snapshot.sort_by(|a, b| a.definition_id.cmp(&b.definition_id));

        Ok(stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }
}
