//! Integration tests for the background reconciliation service

mod common;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::*;
use subscription_orchestrator::config::{PoolConfig, ServiceConfig};
use subscription_orchestrator::error::ReconcileError;
use subscription_orchestrator::models::{ActivityDefinition, WorkflowDefinition};
use subscription_orchestrator::orchestration::ReconciliationService;

const WAIT: Duration = Duration::from_secs(3);

fn service_config() -> ServiceConfig {
    ServiceConfig {
        reconcile_on_startup: true,
        termination_poll_interval_ms: 20,
    }
}

async fn live_key_count(fixture: &PoolFixture) -> usize {
    fixture.pool.len().await
}

async fn wait_for_live_keys(fixture: &PoolFixture, expected: usize) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if live_key_count(fixture).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_startup_reconcile_brings_up_existing_subscriptions() {
    let fixture = PoolFixture::new(PoolConfig::default());
    fixture
        .registry
        .upsert(definition("A", &[("orders", "sub-a")]));

    let service = ReconciliationService::start(
        fixture.pool.clone(),
        service_config(),
        fixture.registry.subscribe_changes(),
    );

    assert!(wait_for_live_keys(&fixture, 1).await);
    assert!(service.is_running());

    let torn_down = service.shutdown(&CancellationToken::new()).await.unwrap();
    assert_eq!(torn_down, 1);
    assert!(!service.is_running());
    assert_eq!(fixture.broker.live_handles(), 0);
}

#[tokio::test]
async fn test_definition_changes_trigger_reconciliation() {
    let fixture = PoolFixture::new(PoolConfig::default());
    let service = ReconciliationService::start(
        fixture.pool.clone(),
        service_config(),
        fixture.registry.subscribe_changes(),
    );

    fixture.registry.upsert(definition(
        "B",
        &[("orders", "sub-a"), ("invoices", "sub-b")],
    ));
    assert!(wait_for_live_keys(&fixture, 2).await);

    fixture.registry.remove("B");
    assert!(wait_for_live_keys(&fixture, 0).await);

    service.shutdown(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_burst_of_changes_is_coalesced() {
    let fixture = PoolFixture::new(PoolConfig::default());
    let service = ReconciliationService::start(
        fixture.pool.clone(),
        ServiceConfig {
            reconcile_on_startup: false,
            ..service_config()
        },
        fixture.registry.subscribe_changes(),
    );

    for i in 0..20 {
        fixture
            .registry
            .upsert(definition(&format!("wf-{i}"), &[("orders", "sub-a")]));
    }
    assert!(wait_for_live_keys(&fixture, 1).await);
    service.shutdown(&CancellationToken::new()).await.unwrap();

    // One acquisition per pass; twenty changes never need twenty passes
    assert!(fixture.broker.acquired_count() < 20);
}

#[tokio::test]
async fn test_unrelated_definition_does_not_recreate_workers() {
    let fixture = PoolFixture::new(PoolConfig::default());
    fixture
        .registry
        .upsert(definition("A", &[("orders", "sub-a")]));
    fixture.registry.upsert(
        WorkflowDefinition::new("timer").with_activity(ActivityDefinition::new("t1", "Timer")),
    );
    let service = ReconciliationService::start(
        fixture.pool.clone(),
        service_config(),
        fixture.registry.subscribe_changes(),
    );
    assert!(wait_for_live_keys(&fixture, 1).await);

    // First sighting of "timer" by the service still triggers a pass
    fixture.registry.upsert(
        WorkflowDefinition::new("timer").with_activity(ActivityDefinition::new("t1", "Timer")),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = fixture.broker.acquired_count();

    fixture.registry.upsert(
        WorkflowDefinition::new("timer")
            .with_activity(ActivityDefinition::new("t1", "Timer"))
            .with_activity(ActivityDefinition::new("t2", "Log")),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fixture.broker.acquired_count(), settled);
    service.shutdown(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_reconcile_after_service_shutdown_is_refused() {
    let fixture = PoolFixture::new(PoolConfig::default());
    let service = ReconciliationService::start(
        fixture.pool.clone(),
        service_config(),
        fixture.registry.subscribe_changes(),
    );
    service.shutdown(&CancellationToken::new()).await.unwrap();

    let result = service.pool().reconcile(&CancellationToken::new()).await;
    assert!(matches!(result, Err(ReconcileError::ShutDown)));
}
