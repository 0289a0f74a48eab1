//! # System Constants
//!
//! Activity types, property names and environment variable names shared by
//! discovery, configuration and logging.

/// Trigger activity identifiers
pub mod activity {
    /// Activity type that subscribes a workflow to a broker topic subscription
    pub const TOPIC_MESSAGE_RECEIVED: &str = "AzureServiceBusTopicMessageReceived";

    /// Property carrying the topic name on a trigger activity
    pub const TOPIC_NAME_PROPERTY: &str = "TopicName";

    /// Property carrying the subscription name on a trigger activity
    pub const SUBSCRIPTION_NAME_PROPERTY: &str = "SubscriptionName";
}

/// Environment variables consulted at startup
pub mod env {
    pub const ORCHESTRATOR_ENV: &str = "ORCHESTRATOR_ENV";
    pub const APP_ENV: &str = "APP_ENV";
    pub const CONFIG_DIR: &str = "ORCHESTRATOR_CONFIG_DIR";

    /// Prefix for `ORCHESTRATOR__SECTION__KEY` configuration overrides
    pub const OVERRIDE_PREFIX: &str = "ORCHESTRATOR";
    pub const OVERRIDE_SEPARATOR: &str = "__";
}

pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_CONFIG_DIRECTORY: &str = "config";
pub const CONFIG_FILE_STEM: &str = "orchestrator";
