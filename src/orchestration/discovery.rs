//! # Subscription Discovery
//!
//! Scans registered workflow definitions for trigger activities and resolves the
//! distinct set of (topic, subscription) pairs they declare.
//!
//! ```text
//! registry.list() ─► has trigger activity? ─► reflect ─► resolve topic + subscription
//!                                                             │
//!                                   DiscoveredSubscriptionSet ◄┘ (deduplicated)
//! ```
//!
//! A definition that fails to reflect or resolve is recorded as a
//! [`ResolutionFailure`] and contributes nothing; the pass continues. Registry
//! failures, an unavailable resolution engine and cancellation abort the pass.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{DiscoveryConfig, EmptyKeyPolicy};
use crate::error::{DiscoveryError, ResolutionError};
use crate::models::{DiscoveredSubscriptionSet, SubscriptionKey, WorkflowDefinition};
use crate::registry::{ActivityBlueprint, BlueprintReflector, WorkflowBlueprint, WorkflowRegistry};
use crate::resolution::PropertyResolver;

/// One definition excluded from a discovery pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub definition_id: String,
    pub version: i32,
    pub reason: String,
}

/// Result of a discovery pass
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub subscriptions: DiscoveredSubscriptionSet,
    pub failures: Vec<ResolutionFailure>,
    pub definitions_scanned: usize,
    pub definitions_matched: usize,
}

pub struct SubscriptionDiscoverer {
    registry: Arc<dyn WorkflowRegistry>,
    reflector: Arc<dyn BlueprintReflector>,
    resolver: Arc<dyn PropertyResolver>,
    config: DiscoveryConfig,
}

impl std::fmt::Debug for SubscriptionDiscoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionDiscoverer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubscriptionDiscoverer {
    pub fn new(
        registry: Arc<dyn WorkflowRegistry>,
        reflector: Arc<dyn BlueprintReflector>,
        resolver: Arc<dyn PropertyResolver>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            reflector,
            resolver,
            config,
        }
    }

    pub fn trigger_activity_type(&self) -> &str {
        &self.config.trigger_activity_type
    }

    /// Run one discovery pass
    #[instrument(skip_all, fields(trigger = %self.config.trigger_activity_type))]
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome, DiscoveryError> {
        let mut definitions = self.registry.list(cancel).await?;
        let mut outcome = DiscoveryOutcome::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                next = definitions.next() => next,
            };
            let Some(definition) = next else { break };
            let definition = definition?;
            outcome.definitions_scanned += 1;

            if !definition.has_activity_of_type(&self.config.trigger_activity_type) {
                continue;
            }
            outcome.definitions_matched += 1;

            match self.definition_subscriptions(&definition, cancel).await {
                Ok(keys) => outcome.subscriptions.extend(keys),
                Err(error) => self.classify_failure(&definition, error, &mut outcome)?,
            }
        }

        info!(
            scanned = outcome.definitions_scanned,
            matched = outcome.definitions_matched,
            discovered = outcome.subscriptions.len(),
            failures = outcome.failures.len(),
            "Subscription discovery completed"
        );

        Ok(outcome)
    }

    /// Keys declared by one definition; all or nothing
    async fn definition_subscriptions(
        &self,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubscriptionKey>, ResolutionError> {
        let blueprint = self.reflector.reflect(definition, cancel).await?;
        let mut keys = Vec::new();

        for activity in blueprint.activities_of_type(&self.config.trigger_activity_type) {
            let topic = self
                .resolve_required(&blueprint, activity, &self.config.topic_property, cancel)
                .await?;
            let subscription = self
                .resolve_required(&blueprint, activity, &self.config.subscription_property, cancel)
                .await?;

            debug!(
                definition_id = %definition.definition_id,
                activity_id = %activity.activity_id,
                topic = %topic,
                subscription = %subscription,
                "Resolved trigger subscription"
            );
            keys.push(SubscriptionKey::new(topic, subscription));
        }

        Ok(keys)
    }

    async fn resolve_required(
        &self,
        blueprint: &WorkflowBlueprint,
        activity: &ActivityBlueprint,
        property: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ResolutionError> {
        match self
            .resolver
            .resolve(blueprint, activity, property, cancel)
            .await?
        {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(ResolutionError::EmptyProperty {
                activity_id: activity.activity_id.clone(),
                property: property.to_string(),
            }),
        }
    }

    /// Decide whether a definition failure aborts the pass or is recorded
    fn classify_failure(
        &self,
        definition: &WorkflowDefinition,
        error: ResolutionError,
        outcome: &mut DiscoveryOutcome,
    ) -> Result<(), DiscoveryError> {
        match error {
            ResolutionError::Cancelled => Err(DiscoveryError::Cancelled),
            ResolutionError::EngineUnavailable { message } => {
                Err(DiscoveryError::ResolutionEngineUnavailable { message })
            }
            ResolutionError::EmptyProperty {
                activity_id,
                property,
            } if self.config.empty_key_policy == EmptyKeyPolicy::Reject => {
                Err(DiscoveryError::InvalidSubscriptionKey {
                    definition_id: definition.definition_id.clone(),
                    activity_id,
                    property,
                })
            }
            error => {
                warn!(
                    definition_id = %definition.definition_id,
                    version = definition.version,
                    error = %error,
                    "Skipping workflow definition during discovery"
                );
                outcome.failures.push(ResolutionFailure {
                    definition_id: definition.definition_id.clone(),
                    version: definition.version,
                    reason: error.to_string(),
                });
                Ok(())
            }
        }
    }
}
