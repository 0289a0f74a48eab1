#![allow(clippy::doc_markdown)] // Allow technical terms like ServiceBus in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Subscription Orchestrator
//!
//! Keeps one long-running message worker alive for every distinct
//! (topic, subscription) pair referenced by a trigger activity in the registered
//! workflow definitions.
//!
//! ## Overview
//!
//! Workflow definitions declare topic-message triggers as activities carrying a
//! topic and a subscription property. The orchestrator discovers those pairs,
//! starts a [`orchestration::TopicWorker`] per pair and hands every received
//! message to the workflow runtime through a [`messaging::MessageDispatcher`].
//! When definitions change, [`orchestration::WorkerPool::reconcile`] rebuilds the
//! worker set so that it matches the current definitions again.
//!
//! ## Key Features
//!
//! - **Deduplicated Discovery**: Many workflows sharing a subscription get one worker
//! - **Fault Containment**: A broken definition, receiver or message never takes down the rest
//! - **Serialized Reconciliation**: Concurrent triggers never produce two workers for one key
//! - **Fail-Safe Discovery Errors**: A failed pass leaves the pool empty, never stale
//! - **Cooperative Cancellation**: Every long operation takes a `CancellationToken`
//!
//! ## Module Organization
//!
//! - [`models`] - Subscription keys, workflow definitions and received messages
//! - [`registry`] - Workflow definition registry and blueprint reflection
//! - [`resolution`] - Activity property resolution
//! - [`messaging`] - Receiver and dispatcher seams plus an in-memory broker
//! - [`orchestration`] - Discovery, workers, the worker pool and the reconciliation service
//! - [`config`] - Layered configuration management
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subscription_orchestrator::config::ConfigManager;
//! use subscription_orchestrator::messaging::{InMemoryBroker, MessageDispatcher};
//! use subscription_orchestrator::orchestration::{SubscriptionDiscoverer, WorkerPool};
//! use subscription_orchestrator::registry::{DefinitionBlueprintReflector, InMemoryWorkflowRegistry};
//! use subscription_orchestrator::resolution::LiteralPropertyResolver;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(dispatcher: Arc<dyn MessageDispatcher>) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let discoverer = SubscriptionDiscoverer::new(
//!     Arc::new(InMemoryWorkflowRegistry::new()),
//!     Arc::new(DefinitionBlueprintReflector),
//!     Arc::new(LiteralPropertyResolver),
//!     config.discovery.clone(),
//! );
//! let pool = WorkerPool::new(
//!     discoverer,
//!     Arc::new(InMemoryBroker::new()),
//!     dispatcher,
//!     config.pool.clone(),
//! );
//!
//! let summary = pool.reconcile(&CancellationToken::new()).await?;
//! println!("{} workers running", summary.started);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resolution;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, ReconcileError, Result};
pub use models::{SubscriptionKey, WorkflowDefinition};
pub use orchestration::{
    ReconciliationService, ReconciliationSummary, SubscriptionDiscoverer, TopicWorker, WorkerPool,
};
