//! # Worker Pool
//!
//! Owns the live mapping from [`SubscriptionKey`] to [`TopicWorker`] and keeps it
//! in line with the latest discovery result. [`WorkerPool::reconcile`] and
//! [`WorkerPool::shutdown`] are the only operations that mutate the mapping, and
//! both run behind the reconciliation gate, so at most one of them executes at a
//! time.
//!
//! ## Full rebuild (default)
//!
//! ```text
//! gate ─► stop all workers (parallel, each removed once drained)
//!      ─► discover ──(error)──► pool left empty, error returned
//!      ─► acquire handle + start worker per key (failures recorded, key skipped)
//!      ─► summary
//! ```
//!
//! ## Incremental
//!
//! Discovery runs first; only workers whose key vanished (or whose loop already
//! terminated) are torn down and only missing keys are started. A discovery failure
//! still tears everything down.
//!
//! ## Cancellation
//!
//! A token cancelled before teardown leaves running workers alone. A teardown
//! that has signalled its workers finishes draining and vacating them before the
//! pass reports [`ReconcileError::Cancelled`]; no new worker starts afterwards.

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::discovery::{ResolutionFailure, SubscriptionDiscoverer};
use super::worker::{
    TopicWorker, WorkerContext, WorkerExit, WorkerStartError, WorkerState, WorkerStatsSnapshot,
    WorkerTermination,
};
use crate::config::{ContentionPolicy, PoolConfig, ReconcileStrategy};
use crate::error::{DiscoveryError, ReconcileError};
use crate::logging::log_reconciliation;
use crate::messaging::{MessageDispatcher, ReceiverFactory};
use crate::models::SubscriptionKey;

/// Stage at which a key failed to get a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFailureStage {
    Acquisition,
    Start,
}

/// A discovered key that ended the pass without a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFailure {
    pub key: SubscriptionKey,
    pub stage: KeyFailureStage,
    pub reason: String,
}

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub torn_down: usize,
    /// Workers kept running by an incremental pass
    pub retained: usize,
    pub discovered: usize,
    pub started: usize,
    pub key_failures: Vec<KeyFailure>,
    pub resolution_failures: Vec<ResolutionFailure>,
    pub duration_ms: u64,
}

/// Point-in-time view of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub key: SubscriptionKey,
    pub worker_id: Uuid,
    pub state: WorkerState,
    pub exit: Option<WorkerExit>,
    pub stats: WorkerStatsSnapshot,
}

/// Why a pass stopped early
enum PassAbort {
    Cancelled,
    Discovery(DiscoveryError),
}

enum SpawnFailure {
    Cancelled,
    Failed(KeyFailure),
}

pub struct WorkerPool {
    discoverer: SubscriptionDiscoverer,
    factory: Arc<dyn ReceiverFactory>,
    context: WorkerContext,
    config: PoolConfig,
    reconcile_gate: tokio::sync::Mutex<()>,
    workers: RwLock<HashMap<SubscriptionKey, TopicWorker>>,
    terminations: Mutex<mpsc::UnboundedReceiver<WorkerTermination>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let worker_count = self.workers.try_read().map(|w| w.len()).ok();
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("discoverer", &self.discoverer)
            .field("worker_count", &worker_count)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        discoverer: SubscriptionDiscoverer,
        factory: Arc<dyn ReceiverFactory>,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: PoolConfig,
    ) -> Self {
        let (termination_tx, termination_rx) = mpsc::unbounded_channel();
        let context = WorkerContext {
            dispatcher,
            factory: Arc::clone(&factory),
            terminations: termination_tx,
            settle_messages: config.settle_messages,
        };

        Self {
            discoverer,
            factory,
            context,
            config,
            reconcile_gate: tokio::sync::Mutex::new(()),
            workers: RwLock::new(HashMap::new()),
            terminations: Mutex::new(termination_rx),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn trigger_activity_type(&self) -> &str {
        self.discoverer.trigger_activity_type()
    }

    /// Rebuild the worker set from the current workflow definitions
    #[instrument(skip_all, fields(strategy = ?self.config.reconcile_strategy))]
    pub async fn reconcile(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationSummary, ReconcileError> {
        let _gate = self.enter_gate(cancel).await?;
        if self.is_shut_down() {
            return Err(ReconcileError::ShutDown);
        }

        let started_at = Instant::now();
        let mut summary = ReconciliationSummary::default();
        let pass = match self.config.reconcile_strategy {
            ReconcileStrategy::FullRebuild => self.full_rebuild(cancel, &mut summary).await,
            ReconcileStrategy::Incremental => self.incremental(cancel, &mut summary).await,
        };
        summary.duration_ms = started_at.elapsed().as_millis() as u64;

        let strategy = format!("{:?}", self.config.reconcile_strategy);
        match pass {
            Ok(()) => {
                log_reconciliation(&strategy, "completed", &summary);
                for failure in &summary.key_failures {
                    warn!(
                        topic = %failure.key.topic_name(),
                        subscription = %failure.key.subscription_name(),
                        stage = ?failure.stage,
                        reason = %failure.reason,
                        "Subscription left without a worker"
                    );
                }
                Ok(summary)
            }
            Err(PassAbort::Cancelled) => {
                log_reconciliation(&strategy, "cancelled", &summary);
                Err(ReconcileError::Cancelled {
                    summary: Box::new(summary),
                })
            }
            Err(PassAbort::Discovery(source)) => {
                log_reconciliation(&strategy, "discovery_failed", &summary);
                error!(error = %source, "❌ RECONCILE: Discovery failed, worker pool left empty");
                Err(ReconcileError::Discovery {
                    torn_down: summary.torn_down,
                    source,
                })
            }
        }
    }

    /// Stop every worker and refuse further reconciliation
    #[instrument(skip_all)]
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<usize, ReconcileError> {
        let _gate = tokio::select! {
            biased;
            gate = self.reconcile_gate.lock() => gate,
            _ = cancel.cancelled() => {
                return Err(ReconcileError::Cancelled { summary: Box::default() });
            }
        };
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled { summary: Box::default() });
        }
        self.shut_down.store(true, Ordering::Release);

        let snapshot = self.snapshot().await;
        let mut summary = ReconciliationSummary::default();
        match self.teardown(snapshot, cancel, &mut summary).await {
            Ok(()) => {
                info!(torn_down = summary.torn_down, "🛑 POOL: Worker pool shut down");
                Ok(summary.torn_down)
            }
            Err(_) => Err(ReconcileError::Cancelled {
                summary: Box::new(summary),
            }),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Keys with a worker in the mapping, sorted
    pub async fn live_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self.workers.read().await.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Status of every worker in the mapping, sorted by key
    pub async fn worker_statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .workers
            .read()
            .await
            .values()
            .map(|worker| WorkerStatus {
                key: worker.key().clone(),
                worker_id: worker.worker_id(),
                state: worker.state(),
                exit: worker.exit(),
                stats: worker.stats(),
            })
            .collect();
        statuses.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Drain terminal failures reported by workers since the last call
    pub fn poll_terminations(&self) -> Vec<WorkerTermination> {
        let mut receiver = self.terminations.lock();
        let mut terminations = Vec::new();
        while let Ok(termination) = receiver.try_recv() {
            terminations.push(termination);
        }
        terminations
    }

    async fn enter_gate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, ()>, ReconcileError> {
        match self.config.contention_policy {
            ContentionPolicy::Reject => self
                .reconcile_gate
                .try_lock()
                .map_err(|_| ReconcileError::InProgress),
            ContentionPolicy::Wait => tokio::select! {
                biased;
                gate = self.reconcile_gate.lock() => Ok(gate),
                _ = cancel.cancelled() => Err(ReconcileError::Cancelled { summary: Box::default() }),
            },
        }
    }

    async fn full_rebuild(
        &self,
        cancel: &CancellationToken,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), PassAbort> {
        let snapshot = self.snapshot().await;
        info!(workers = snapshot.len(), "🔄 RECONCILE: Tearing down existing workers");
        self.teardown(snapshot, cancel, summary).await?;

        let outcome = self.discover(cancel).await?;
        summary.discovered = outcome.subscriptions.len();
        summary.resolution_failures = outcome.failures;

        self.build(outcome.subscriptions.into_iter(), cancel, summary)
            .await
    }

    async fn incremental(
        &self,
        cancel: &CancellationToken,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), PassAbort> {
        let outcome = match self.discover(cancel).await {
            Ok(outcome) => outcome,
            Err(PassAbort::Discovery(source)) => {
                let snapshot = self.snapshot().await;
                self.teardown(snapshot, cancel, summary).await?;
                return Err(PassAbort::Discovery(source));
            }
            Err(abort) => return Err(abort),
        };
        summary.discovered = outcome.subscriptions.len();
        summary.resolution_failures = outcome.failures;

        let (stale, retained): (Vec<_>, Vec<_>) =
            self.snapshot().await.into_iter().partition(|(key, worker)| {
                !outcome.subscriptions.contains(key)
                    || matches!(worker.state(), WorkerState::Draining | WorkerState::Stopped)
            });
        summary.retained = retained.len();
        self.teardown(stale, cancel, summary).await?;

        let missing: Vec<SubscriptionKey> = {
            let workers = self.workers.read().await;
            outcome
                .subscriptions
                .into_iter()
                .filter(|key| !workers.contains_key(key))
                .collect()
        };
        self.build(missing.into_iter(), cancel, summary).await
    }

    async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<super::discovery::DiscoveryOutcome, PassAbort> {
        match self.discoverer.discover(cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(DiscoveryError::Cancelled) => Err(PassAbort::Cancelled),
            Err(e) if cancel.is_cancelled() => {
                warn!(error = %e, "Discovery failed after cancellation");
                Err(PassAbort::Cancelled)
            }
            Err(e) => Err(PassAbort::Discovery(e)),
        }
    }

    async fn snapshot(&self) -> Vec<(SubscriptionKey, TopicWorker)> {
        self.workers
            .read()
            .await
            .iter()
            .map(|(key, worker)| (key.clone(), worker.clone()))
            .collect()
    }

    /// Stop workers concurrently, vacating each slot once its worker has stopped.
    ///
    /// A cancelled token signals nothing. Once signalled, every worker is awaited
    /// to completion so that no drained worker is left in the mapping; a token
    /// that fires meanwhile aborts the pass afterwards.
    async fn teardown(
        &self,
        workers: Vec<(SubscriptionKey, TopicWorker)>,
        cancel: &CancellationToken,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), PassAbort> {
        if cancel.is_cancelled() {
            return Err(PassAbort::Cancelled);
        }

        for (_, worker) in &workers {
            worker.signal_stop();
        }

        let mut stops: FuturesUnordered<_> = workers
            .into_iter()
            .map(|(key, worker)| async move {
                let result = worker.stopped().await;
                (key, worker.worker_id(), result)
            })
            .collect();

        while let Some((key, worker_id, result)) = stops.next().await {
            if let Err(e) = &result {
                warn!(worker_id = %worker_id, error = %e, "Worker vanished during stop");
            }
            self.vacate(&key, worker_id).await;
            summary.torn_down += 1;
        }

        if cancel.is_cancelled() {
            Err(PassAbort::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Remove a stopped worker, unless its slot was already reused
    async fn vacate(&self, key: &SubscriptionKey, worker_id: Uuid) {
        let mut workers = self.workers.write().await;
        if workers.get(key).map(TopicWorker::worker_id) == Some(worker_id) {
            workers.remove(key);
        }
    }

    async fn build(
        &self,
        keys: impl Iterator<Item = SubscriptionKey>,
        cancel: &CancellationToken,
        summary: &mut ReconciliationSummary,
    ) -> Result<(), PassAbort> {
        for key in keys {
            if cancel.is_cancelled() {
                return Err(PassAbort::Cancelled);
            }

            match self.spawn_worker(&key, cancel).await {
                Ok(worker) => {
                    self.workers.write().await.insert(key, worker);
                    summary.started += 1;
                }
                Err(SpawnFailure::Failed(failure)) => summary.key_failures.push(failure),
                Err(SpawnFailure::Cancelled) => return Err(PassAbort::Cancelled),
            }
        }
        Ok(())
    }

    /// Acquire a handle and start a worker as one unit: the handle is released
    /// whenever no worker ends up owning it.
    async fn spawn_worker(
        &self,
        key: &SubscriptionKey,
        cancel: &CancellationToken,
    ) -> Result<TopicWorker, SpawnFailure> {
        let handle = match self.factory.acquire(key, cancel).await {
            Ok(handle) => handle,
            Err(_) if cancel.is_cancelled() => return Err(SpawnFailure::Cancelled),
            Err(e) => {
                return Err(SpawnFailure::Failed(KeyFailure {
                    key: key.clone(),
                    stage: KeyFailureStage::Acquisition,
                    reason: e.to_string(),
                }))
            }
        };

        if cancel.is_cancelled() {
            self.release_orphan(key, handle).await;
            return Err(SpawnFailure::Cancelled);
        }

        match TopicWorker::start(key.clone(), handle, self.context.clone()) {
            Ok(worker) => Ok(worker),
            Err(WorkerStartError { error, handle }) => {
                self.release_orphan(key, handle).await;
                Err(SpawnFailure::Failed(KeyFailure {
                    key: key.clone(),
                    stage: KeyFailureStage::Start,
                    reason: error.to_string(),
                }))
            }
        }
    }

    async fn release_orphan(
        &self,
        key: &SubscriptionKey,
        handle: Box<dyn crate::messaging::ReceiverHandle>,
    ) {
        if let Err(e) = self.factory.release(handle).await {
            warn!(
                topic = %key.topic_name(),
                subscription = %key.subscription_name(),
                error = %e,
                "Failed to release receiver that never got a worker"
            );
        }
    }
}
