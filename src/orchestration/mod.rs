//! # Orchestration
//!
//! Subscription discovery, topic workers and the pool that reconciles one
//! against the other.
//!
//! ## Core Components
//!
//! - **SubscriptionDiscoverer**: Scans workflow definitions for trigger activities and
//!   resolves the distinct (topic, subscription) keys they declare
//! - **TopicWorker**: Long-running receive loop bound to exactly one subscription key
//! - **WorkerPool**: Owns the key → worker mapping and rebuilds it via `reconcile`
//! - **ReconciliationService**: Background task that triggers reconciliation on
//!   startup and on relevant definition changes

pub mod discovery;
pub mod pool;
pub mod service;
pub mod worker;

pub use discovery::{DiscoveryOutcome, ResolutionFailure, SubscriptionDiscoverer};
pub use pool::{KeyFailure, KeyFailureStage, ReconciliationSummary, WorkerPool, WorkerStatus};
pub use service::{ChangeKind, DefinitionChange, ReconciliationService};
pub use worker::{
    TopicWorker, WorkerContext, WorkerExit, WorkerStartError, WorkerState, WorkerStats,
    WorkerStatsSnapshot, WorkerTermination,
};
