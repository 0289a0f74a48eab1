//! # Orchestrator Configuration
//!
//! Typed configuration for discovery, the worker pool, the hosted reconciliation
//! service and logging. Every section has serde defaults so a missing file or a
//! partial file still yields a complete, validated configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use subscription_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let trigger = &manager.config().discovery.trigger_activity_type;
//! let strategy = manager.config().pool.reconcile_strategy;
//! # let _ = (trigger, strategy);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::activity;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub discovery: DiscoveryConfig,
    pub pool: PoolConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

impl OrchestratorConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        self.discovery.validate()?;
        self.service.validate()?;
        Ok(())
    }
}

/// How discovery treats a trigger activity whose topic or subscription resolves empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyKeyPolicy {
    /// Warn, record a per-definition failure and exclude the definition
    #[default]
    Skip,
    /// Abort the discovery pass
    Reject,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Activity type whose presence subscribes a workflow to a topic
    pub trigger_activity_type: String,
    pub topic_property: String,
    pub subscription_property: String,
    pub empty_key_policy: EmptyKeyPolicy,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            trigger_activity_type: activity::TOPIC_MESSAGE_RECEIVED.to_string(),
            topic_property: activity::TOPIC_NAME_PROPERTY.to_string(),
            subscription_property: activity::SUBSCRIPTION_NAME_PROPERTY.to_string(),
            empty_key_policy: EmptyKeyPolicy::default(),
        }
    }
}

impl DiscoveryConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("discovery.trigger_activity_type", &self.trigger_activity_type),
            ("discovery.topic_property", &self.topic_property),
            ("discovery.subscription_property", &self.subscription_property),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "discovery configuration",
                ));
            }
        }

        if self.topic_property == self.subscription_property {
            return Err(ConfigurationError::invalid_value(
                "discovery.subscription_property",
                self.subscription_property.clone(),
                "topic and subscription properties must differ",
            ));
        }

        Ok(())
    }
}

/// Reconciliation algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    /// Stop every worker, rediscover, start every worker
    #[default]
    FullRebuild,
    /// Rediscover, then stop removed keys and start added keys only
    Incremental,
}

/// Behaviour of a reconcile call that finds another reconciliation running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionPolicy {
    #[default]
    Wait,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub reconcile_strategy: ReconcileStrategy,
    pub contention_policy: ContentionPolicy,
    /// Complete messages after a successful dispatch and abandon them after a failed one
    pub settle_messages: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reconcile_strategy: ReconcileStrategy::default(),
            contention_policy: ContentionPolicy::default(),
            settle_messages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub reconcile_on_startup: bool,
    pub termination_poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reconcile_on_startup: true,
            termination_poll_interval_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    pub fn termination_poll_interval(&self) -> Duration {
        Duration::from_millis(self.termination_poll_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.termination_poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "service.termination_poll_interval_ms",
                "0",
                "poll interval must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to an environment-based default
    pub level: Option<String>,
    pub json: bool,
}

impl LoggingConfig {
    /// Effective filter directive for the given environment
    pub fn effective_level(&self, environment: &str) -> String {
        match &self.level {
            Some(level) if !level.trim().is_empty() => level.clone(),
            _ => match environment {
                "production" => "info".to_string(),
                _ => "debug".to_string(),
            },
        }
    }
}
