//! # Topic Worker
//!
//! A worker owns exactly one [`ReceiverHandle`] and runs a receive loop on its own
//! tokio task, dispatching each message to the workflow runtime.
//!
//! ## Lifecycle
//!
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//!              (first       (stop signal   (handle
//!               receive)     or fatal       released)
//!                            receive)
//! ```
//!
//! A message already pulled is always dispatched and settled before the loop
//! observes the stop signal. The handle is released on every exit path,
//! including a panicking dispatcher.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::logging::log_worker_operation;
use crate::messaging::{MessageDispatcher, ReceiverFactory, ReceiverHandle};
use crate::models::{ReceivedMessage, SubscriptionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl WorkerState {
    /// Only single forward steps are legal
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (WorkerState::Starting, WorkerState::Running)
                | (WorkerState::Running, WorkerState::Draining)
                | (WorkerState::Draining, WorkerState::Stopped)
        )
    }
}

/// Why a worker's receive loop ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum WorkerExit {
    /// Stopped on request after draining
    Drained,
    /// Receive call failed; the worker terminated itself
    Fatal(String),
    /// The loop panicked
    Panicked,
}

/// Terminal failure reported by a worker to its pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTermination {
    pub worker_id: Uuid,
    pub key: SubscriptionKey,
    pub exit: WorkerExit,
    pub terminated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    settlement_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub settlement_failures: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            settlement_failures: self.settlement_failures.load(Ordering::Relaxed),
        }
    }
}

/// Collaborators a worker needs, shared by every worker of a pool
#[derive(Clone)]
pub struct WorkerContext {
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub factory: Arc<dyn ReceiverFactory>,
    pub terminations: mpsc::UnboundedSender<WorkerTermination>,
    pub settle_messages: bool,
}

/// Returned when a worker cannot be spawned; hands the receiver back for release
pub struct WorkerStartError {
    pub error: WorkerError,
    pub handle: Box<dyn ReceiverHandle>,
}

impl std::fmt::Debug for WorkerStartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStartError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Handle to a running receive loop. Clones refer to the same worker.
#[derive(Debug, Clone)]
pub struct TopicWorker {
    worker_id: Uuid,
    key: SubscriptionKey,
    state: watch::Receiver<WorkerState>,
    shutdown: CancellationToken,
    stats: Arc<WorkerStats>,
    exit: Arc<Mutex<Option<WorkerExit>>>,
    started_at: DateTime<Utc>,
}

impl TopicWorker {
    /// Spawn the receive loop for `key` on the current tokio runtime
    pub fn start(
        key: SubscriptionKey,
        handle: Box<dyn ReceiverHandle>,
        context: WorkerContext,
    ) -> Result<Self, WorkerStartError> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                return Err(WorkerStartError {
                    error: WorkerError::RuntimeUnavailable { key },
                    handle,
                })
            }
        };

        let worker_id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let shutdown = CancellationToken::new();
        let stats = Arc::new(WorkerStats::default());
        let exit = Arc::new(Mutex::new(None));

        let task = WorkerTask {
            worker_id,
            key: key.clone(),
            context,
            shutdown: shutdown.clone(),
            state: state_tx,
            stats: Arc::clone(&stats),
            exit: Arc::clone(&exit),
        };
        runtime.spawn(task.run(handle));

        log_worker_operation("start", &key, worker_id, WorkerState::Starting, None);

        Ok(Self {
            worker_id,
            key,
            state: state_rx,
            shutdown,
            stats,
            exit,
            started_at: Utc::now(),
        })
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Exit reason once the worker has stopped
    pub fn exit(&self) -> Option<WorkerExit> {
        self.exit.lock().clone()
    }

    /// Signal drain-and-stop and wait until the handle has been released.
    ///
    /// Idempotent: repeated calls wait on the same completion. Cancelling only
    /// abandons the wait; the worker still drains.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<WorkerExit, WorkerError> {
        self.signal_stop();
        tokio::select! {
            biased;
            exit = self.stopped() => exit,
            _ = cancel.cancelled() => Err(WorkerError::StopCancelled { key: self.key.clone() }),
        }
    }

    /// Ask the loop to drain without waiting for it
    pub fn signal_stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the loop has exited and the handle has been released
    pub async fn stopped(&self) -> Result<WorkerExit, WorkerError> {
        let mut state = self.state.clone();
        let stopped = state
            .wait_for(|s| *s == WorkerState::Stopped)
            .await
            .map(|_| ());

        match (stopped, self.exit()) {
            (Ok(()), Some(exit)) => Ok(exit),
            _ => Err(WorkerError::Lost {
                key: self.key.clone(),
            }),
        }
    }
}

/// State owned by the spawned task
struct WorkerTask {
    worker_id: Uuid,
    key: SubscriptionKey,
    context: WorkerContext,
    shutdown: CancellationToken,
    state: watch::Sender<WorkerState>,
    stats: Arc<WorkerStats>,
    exit: Arc<Mutex<Option<WorkerExit>>>,
}

impl WorkerTask {
    async fn run(self, handle: Box<dyn ReceiverHandle>) {
        let outcome = AssertUnwindSafe(self.receive_loop(handle.as_ref()))
            .catch_unwind()
            .await;

        let exit = match outcome {
            Ok(Ok(())) => WorkerExit::Drained,
            Ok(Err(e)) => {
                error!(
                    worker_id = %self.worker_id,
                    topic = %self.key.topic_name(),
                    subscription = %self.key.subscription_name(),
                    error = %e,
                    "Worker receive failed, terminating"
                );
                WorkerExit::Fatal(e.to_string())
            }
            Err(_) => {
                error!(
                    worker_id = %self.worker_id,
                    topic = %self.key.topic_name(),
                    subscription = %self.key.subscription_name(),
                    "Worker loop panicked, terminating"
                );
                WorkerExit::Panicked
            }
        };

        self.transition(WorkerState::Draining);

        if let Err(e) = self.context.factory.release(handle).await {
            warn!(
                worker_id = %self.worker_id,
                topic = %self.key.topic_name(),
                subscription = %self.key.subscription_name(),
                error = %e,
                "Failed to release receiver"
            );
        }

        *self.exit.lock() = Some(exit.clone());

        if exit != WorkerExit::Drained {
            let termination = WorkerTermination {
                worker_id: self.worker_id,
                key: self.key.clone(),
                exit: exit.clone(),
                terminated_at: Utc::now(),
            };
            if self.context.terminations.send(termination).is_err() {
                debug!(worker_id = %self.worker_id, "Pool no longer listening for terminations");
            }
        }

        self.transition(WorkerState::Stopped);
        let details = format!("{exit:?}");
        log_worker_operation(
            "stopped",
            &self.key,
            self.worker_id,
            WorkerState::Stopped,
            Some(details.as_str()),
        );
    }

    async fn receive_loop(&self, handle: &dyn ReceiverHandle) -> Result<(), WorkerError> {
        self.transition(WorkerState::Running);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = handle.receive() => next,
            };

            match next {
                Ok(Some(message)) => self.process(handle, message).await,
                Ok(None) => continue,
                Err(source) => {
                    // Stop accepting messages before the handle is released
                    self.transition(WorkerState::Draining);
                    return Err(WorkerError::Receive {
                        key: self.key.clone(),
                        source,
                    });
                }
            }
        }
    }

    async fn process(&self, handle: &dyn ReceiverHandle, message: ReceivedMessage) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let dispatched = self.context.dispatcher.dispatch(&self.key, &message).await;
        let settlement = match dispatched {
            Ok(()) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id = %self.worker_id,
                    message_id = %message.message_id,
                    "Message dispatched"
                );
                if self.context.settle_messages {
                    handle.complete(&message).await
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                self.stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id = %self.worker_id,
                    topic = %self.key.topic_name(),
                    subscription = %self.key.subscription_name(),
                    message_id = %message.message_id,
                    error = %e,
                    "Message dispatch failed"
                );
                if self.context.settle_messages {
                    handle.abandon(&message).await
                } else {
                    Ok(())
                }
            }
        };

        if let Err(e) = settlement {
            self.stats.settlement_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker_id = %self.worker_id,
                message_id = %message.message_id,
                error = %e,
                "Message settlement failed"
            );
        }
    }

    fn transition(&self, next: WorkerState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_allows_only_forward_steps() {
        use WorkerState::*;

        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));

        assert!(!Starting.can_transition_to(Draining));
        assert!(!Running.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Draining.can_transition_to(Draining));
    }

    #[test]
    fn test_exit_serialization() {
        let fatal = serde_json::to_value(WorkerExit::Fatal("reset".to_string())).unwrap();
        assert_eq!(fatal, serde_json::json!({"reason": "fatal", "detail": "reset"}));
    }
}
