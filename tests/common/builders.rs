//! Fixture builders for workflow definitions and fully wired pools

use std::sync::Arc;
use std::time::Duration;

use subscription_orchestrator::config::{DiscoveryConfig, PoolConfig};
use subscription_orchestrator::constants::activity::{
    SUBSCRIPTION_NAME_PROPERTY, TOPIC_MESSAGE_RECEIVED, TOPIC_NAME_PROPERTY,
};
use subscription_orchestrator::messaging::{InMemoryBroker, MessageDispatcher};
use subscription_orchestrator::models::{
    ActivityDefinition, PropertyExpression, SubscriptionKey, WorkflowDefinition,
};
use subscription_orchestrator::orchestration::{SubscriptionDiscoverer, WorkerPool};
use subscription_orchestrator::registry::{DefinitionBlueprintReflector, InMemoryWorkflowRegistry};
use subscription_orchestrator::resolution::LiteralPropertyResolver;

use super::RecordingDispatcher;

pub fn key(topic: &str, subscription: &str) -> SubscriptionKey {
    SubscriptionKey::new(topic, subscription)
}

/// Trigger activity with literal topic and subscription properties
pub fn trigger(activity_id: &str, topic: &str, subscription: &str) -> ActivityDefinition {
    ActivityDefinition::new(activity_id, TOPIC_MESSAGE_RECEIVED)
        .with_property(TOPIC_NAME_PROPERTY, PropertyExpression::literal(topic))
        .with_property(
            SUBSCRIPTION_NAME_PROPERTY,
            PropertyExpression::literal(subscription),
        )
}

/// Definition with one trigger per (topic, subscription) pair
pub fn definition(id: &str, pairs: &[(&str, &str)]) -> WorkflowDefinition {
    pairs
        .iter()
        .enumerate()
        .fold(WorkflowDefinition::new(id), |definition, (i, (topic, sub))| {
            definition.with_activity(trigger(&format!("{id}-trigger-{i}"), topic, sub))
        })
}

/// Everything a pool test needs, with handles kept to the in-memory collaborators
pub struct PoolFixture {
    pub registry: Arc<InMemoryWorkflowRegistry>,
    pub broker: Arc<InMemoryBroker>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub pool: Arc<WorkerPool>,
}

impl PoolFixture {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_dispatcher(config, Arc::new(RecordingDispatcher::default()))
    }

    pub fn with_dispatcher(config: PoolConfig, dispatcher: Arc<RecordingDispatcher>) -> Self {
        let registry = Arc::new(InMemoryWorkflowRegistry::new());
        let broker = Arc::new(InMemoryBroker::with_receive_window(Duration::from_millis(10)));
        let discoverer = SubscriptionDiscoverer::new(
            registry.clone(),
            Arc::new(DefinitionBlueprintReflector),
            Arc::new(LiteralPropertyResolver),
            DiscoveryConfig::default(),
        );
        let pool = Arc::new(WorkerPool::new(
            discoverer,
            broker.clone(),
            dispatcher.clone() as Arc<dyn MessageDispatcher>,
            config,
        ));

        Self {
            registry,
            broker,
            dispatcher,
            pool,
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
