mod common;

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::definition;
use subscription_orchestrator::config::DiscoveryConfig;
use subscription_orchestrator::models::SubscriptionKey;
use subscription_orchestrator::orchestration::SubscriptionDiscoverer;
use subscription_orchestrator::registry::{DefinitionBlueprintReflector, InMemoryWorkflowRegistry};
use subscription_orchestrator::resolution::LiteralPropertyResolver;

/// Small name pools so that definitions frequently share subscriptions
fn pair_strategy() -> impl Strategy<Value = (String, String)> {
    (
        prop::sample::select(vec!["orders", "invoices", "refunds"]),
        prop::sample::select(vec!["sub-a", "sub-b"]),
    )
        .prop_map(|(topic, sub)| (topic.to_string(), sub.to_string()))
}

fn corpus_strategy() -> impl Strategy<Value = Vec<Vec<(String, String)>>> {
    prop::collection::vec(prop::collection::vec(pair_strategy(), 0..4), 0..8)
}

fn discover(corpus: &[Vec<(String, String)>]) -> Vec<SubscriptionKey> {
    let registry = Arc::new(InMemoryWorkflowRegistry::new());
    for (i, pairs) in corpus.iter().enumerate() {
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(topic, sub)| (topic.as_str(), sub.as_str()))
            .collect();
        registry.upsert(definition(&format!("wf-{i}"), &pairs));
    }
    let discoverer = SubscriptionDiscoverer::new(
        registry,
        Arc::new(DefinitionBlueprintReflector),
        Arc::new(LiteralPropertyResolver),
        DiscoveryConfig::default(),
    );

    let outcome = tokio_test::block_on(discoverer.discover(&CancellationToken::new()))
        .expect("in-memory discovery cannot fail");
    outcome.subscriptions.into_iter().collect()
}

proptest! {
    /// Property: discovery never yields the same key twice
    #[test]
    fn discovered_keys_are_distinct(corpus in corpus_strategy()) {
        let keys = discover(&corpus);
        let distinct: BTreeSet<_> = keys.iter().cloned().collect();
        prop_assert_eq!(keys.len(), distinct.len());
    }

    /// Property: the discovered set is exactly the union of declared pairs
    #[test]
    fn discovered_keys_match_declared_pairs(corpus in corpus_strategy()) {
        let expected: BTreeSet<SubscriptionKey> = corpus
            .iter()
            .flatten()
            .map(|(topic, sub)| SubscriptionKey::new(topic.as_str(), sub.as_str()))
            .collect();
        let discovered: BTreeSet<SubscriptionKey> = discover(&corpus).into_iter().collect();
        prop_assert_eq!(discovered, expected);
    }
}
