//! # Reconciliation Service
//!
//! Background task that keeps a [`WorkerPool`] current. It reconciles once on
//! startup, then again whenever a definition change touches the trigger
//! activity type. Notifications that queue up while a pass runs are coalesced
//! into a single follow-up pass. Worker terminations are drained and logged on
//! a fixed interval.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pool::WorkerPool;
use crate::config::ServiceConfig;
use crate::error::ReconcileError;

/// Kind of change made to a workflow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Published,
    Retracted,
    Deleted,
}

/// Notification that a workflow definition changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionChange {
    pub definition_id: String,
    pub kind: ChangeKind,
    /// Activity types of the affected definition; `None` when unknown
    pub activity_types: Option<Vec<String>>,
}

impl DefinitionChange {
    pub fn carries_activity(&self, activity_type: &str) -> Option<bool> {
        self.activity_types
            .as_ref()
            .map(|types| types.iter().any(|t| t == activity_type))
    }
}

/// Decides whether a change can alter the discovered subscription set.
///
/// Remembers, per definition, whether the last observed version carried the
/// trigger, so that a definition dropping its trigger still causes a pass.
#[derive(Debug)]
pub(crate) struct ChangeFilter {
    trigger_activity_type: String,
    carried_trigger: HashMap<String, bool>,
}

impl ChangeFilter {
    pub(crate) fn new(trigger_activity_type: impl Into<String>) -> Self {
        Self {
            trigger_activity_type: trigger_activity_type.into(),
            carried_trigger: HashMap::new(),
        }
    }

    pub(crate) fn is_relevant(&mut self, change: &DefinitionChange) -> bool {
        let carries_now = change.carries_activity(&self.trigger_activity_type);
        let carried_before = match change.kind {
            ChangeKind::Published => match carries_now {
                Some(now) => self.carried_trigger.insert(change.definition_id.clone(), now),
                None => self.carried_trigger.remove(&change.definition_id),
            },
            ChangeKind::Retracted | ChangeKind::Deleted => {
                self.carried_trigger.remove(&change.definition_id)
            }
        };

        match (carried_before, carries_now) {
            (_, None) | (None, _) => true,
            (Some(before), Some(now)) => before || now,
        }
    }
}

pub struct ReconciliationService {
    pool: Arc<WorkerPool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("pool", &self.pool)
            .field("running", &!self.cancel.is_cancelled())
            .finish()
    }
}

impl ReconciliationService {
    /// Spawn the service loop on the current runtime
    pub fn start(
        pool: Arc<WorkerPool>,
        config: ServiceConfig,
        changes: broadcast::Receiver<DefinitionChange>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let service_loop = ServiceLoop {
            pool: Arc::clone(&pool),
            config,
            filter: ChangeFilter::new(pool.trigger_activity_type()),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(service_loop.run(changes));

        info!("🚀 SERVICE: Reconciliation service started");
        Self {
            pool,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the loop, then stop every worker. Returns how many were torn down.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<usize, ReconcileError> {
        info!("🛑 SERVICE: Stopping reconciliation service");
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Reconciliation loop ended abnormally");
            }
        }

        let torn_down = self.pool.shutdown(cancel).await?;
        info!(torn_down, "✅ SERVICE: Reconciliation service stopped");
        Ok(torn_down)
    }
}

impl Drop for ReconciliationService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ServiceLoop {
    pool: Arc<WorkerPool>,
    config: ServiceConfig,
    filter: ChangeFilter,
    cancel: CancellationToken,
}

impl ServiceLoop {
    async fn run(mut self, mut changes: broadcast::Receiver<DefinitionChange>) {
        if self.config.reconcile_on_startup {
            self.reconcile("startup").await;
        }

        let poll_interval = self
            .config
            .termination_poll_interval()
            .max(Duration::from_millis(1));
        let mut termination_tick = tokio::time::interval(poll_interval);
        termination_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut changes_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = changes.recv(), if changes_open => {
                    let relevant = match received {
                        Ok(change) => self.filter.is_relevant(&change),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Definition change notifications lagged");
                            true
                        }
                        Err(RecvError::Closed) => {
                            info!("Definition change channel closed, reconciling on demand only");
                            changes_open = false;
                            false
                        }
                    };
                    if self.drain_pending(&mut changes, &mut changes_open) || relevant {
                        self.reconcile("definition_change").await;
                    }
                }
                _ = termination_tick.tick() => self.report_terminations(),
            }
        }

        debug!("Reconciliation loop exited");
    }

    /// Consume already-queued notifications; true when any of them matters
    fn drain_pending(
        &mut self,
        changes: &mut broadcast::Receiver<DefinitionChange>,
        changes_open: &mut bool,
    ) -> bool {
        let mut relevant = false;
        while *changes_open {
            match changes.try_recv() {
                Ok(change) => relevant |= self.filter.is_relevant(&change),
                Err(TryRecvError::Lagged(_)) => relevant = true,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => *changes_open = false,
            }
        }
        relevant
    }

    async fn reconcile(&self, trigger: &str) {
        match self.pool.reconcile(&self.cancel).await {
            Ok(summary) => debug!(
                trigger,
                started = summary.started,
                torn_down = summary.torn_down,
                "Reconciliation pass finished"
            ),
            Err(ReconcileError::Cancelled { .. }) if self.cancel.is_cancelled() => {
                debug!(trigger, "Reconciliation interrupted by service shutdown");
            }
            Err(e) => error!(trigger, error = %e, "❌ SERVICE: Reconciliation failed"),
        }
    }

    fn report_terminations(&self) {
        for termination in self.pool.poll_terminations() {
            warn!(
                worker_id = %termination.worker_id,
                topic = %termination.key.topic_name(),
                subscription = %termination.key.subscription_name(),
                exit = ?termination.exit,
                "⚠️ SERVICE: Worker terminated without being stopped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIGGER: &str = "AzureServiceBusTopicMessageReceived";

    fn published(id: &str, types: &[&str]) -> DefinitionChange {
        DefinitionChange {
            definition_id: id.to_string(),
            kind: ChangeKind::Published,
            activity_types: Some(types.iter().map(|t| t.to_string()).collect()),
        }
    }

    #[test]
    fn test_first_sighting_is_relevant() {
        let mut filter = ChangeFilter::new(TRIGGER);
        assert!(filter.is_relevant(&published("wf-1", &["Timer"])));
    }

    #[test]
    fn test_unrelated_republish_is_skipped() {
        let mut filter = ChangeFilter::new(TRIGGER);
        filter.is_relevant(&published("wf-1", &["Timer"]));
        assert!(!filter.is_relevant(&published("wf-1", &["Timer", "Log"])));
    }

    #[test]
    fn test_dropping_trigger_is_relevant() {
        let mut filter = ChangeFilter::new(TRIGGER);
        assert!(filter.is_relevant(&published("wf-1", &[TRIGGER])));
        assert!(filter.is_relevant(&published("wf-1", &["Timer"])));
        assert!(!filter.is_relevant(&published("wf-1", &["Timer"])));
    }

    #[test]
    fn test_unknown_activity_types_are_relevant() {
        let mut filter = ChangeFilter::new(TRIGGER);
        filter.is_relevant(&published("wf-1", &["Timer"]));
        let change = DefinitionChange {
            definition_id: "wf-1".to_string(),
            kind: ChangeKind::Retracted,
            activity_types: None,
        };
        assert!(filter.is_relevant(&change));
    }

    #[test]
    fn test_deleting_non_trigger_definition_is_skipped() {
        let mut filter = ChangeFilter::new(TRIGGER);
        filter.is_relevant(&published("wf-1", &["Timer"]));
        let change = DefinitionChange {
            definition_id: "wf-1".to_string(),
            kind: ChangeKind::Deleted,
            activity_types: Some(vec!["Timer".to_string()]),
        };
        assert!(!filter.is_relevant(&change));
    }
}
