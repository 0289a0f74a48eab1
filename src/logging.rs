//! # Structured Logging Module
//!
//! Environment-aware structured logging on `tracing-subscriber`, with a plain
//! console layout for development and JSON lines for log shippers.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::LoggingConfig;
use crate::models::SubscriptionKey;
use crate::orchestration::{ReconciliationSummary, WorkerState};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let level = config.effective_level(environment);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

        let json_layer = config.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
        });
        let console_layer = (!config.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
        });

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log the outcome of one reconciliation pass
pub fn log_reconciliation(strategy: &str, outcome: &str, summary: &ReconciliationSummary) {
    tracing::info!(
        strategy = %strategy,
        outcome = %outcome,
        torn_down = summary.torn_down,
        retained = summary.retained,
        discovered = summary.discovered,
        started = summary.started,
        key_failures = summary.key_failures.len(),
        resolution_failures = summary.resolution_failures.len(),
        duration_ms = summary.duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "🔄 RECONCILIATION"
    );
}

/// Log structured data for worker lifecycle operations
pub fn log_worker_operation(
    operation: &str,
    key: &SubscriptionKey,
    worker_id: Uuid,
    state: WorkerState,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        topic = %key.topic_name(),
        subscription = %key.subscription_name(),
        worker_id = %worker_id,
        state = ?state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "👷 WORKER_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::KeyFailure;
    use crate::orchestration::KeyFailureStage;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            level: Some("warn".to_string()),
            json: false,
        };
        init_structured_logging(&config, "test");
        init_structured_logging(&LoggingConfig::default(), "production");
        assert!(LOGGER_INITIALIZED.get().is_some());
    }

    #[test]
    fn test_structured_helpers_accept_partial_summaries() {
        let key = SubscriptionKey::new("orders", "sub-a");
        let summary = ReconciliationSummary {
            discovered: 1,
            key_failures: vec![KeyFailure {
                key: key.clone(),
                stage: KeyFailureStage::Acquisition,
                reason: "subscription not found".to_string(),
            }],
            ..Default::default()
        };

        log_reconciliation("FullRebuild", "completed", &summary);
        log_worker_operation("start", &key, Uuid::new_v4(), WorkerState::Starting, None);
    }
}
