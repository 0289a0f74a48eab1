//! # In-Memory Broker
//!
//! A [`ReceiverFactory`] backed by per-subscription tokio channels. Messages
//! published to a subscription survive receiver churn, so a worker recreated by a
//! later reconciliation picks up where the previous one stopped.
//!
//! The broker keeps acquire/release accounting and supports failure injection for
//! acquisition and receive calls.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{ReceiverError, ReceiverFactory, ReceiverHandle};
use crate::models::{ReceivedMessage, SubscriptionKey};

const DEFAULT_RECEIVE_WINDOW: Duration = Duration::from_millis(50);
const DEFAULT_MAX_DELIVERY_COUNT: u32 = 3;

/// Outcome recorded when a receiver settles a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Completed,
    Abandoned,
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub key: SubscriptionKey,
    pub message_id: Uuid,
    pub kind: SettlementKind,
}

#[derive(Debug)]
struct SubscriptionQueue {
    sender: mpsc::UnboundedSender<ReceivedMessage>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReceivedMessage>>,
    receive_failure: Mutex<Option<String>>,
}

impl SubscriptionQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            receive_failure: Mutex::new(None),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryBroker {
    queues: DashMap<SubscriptionKey, Arc<SubscriptionQueue>>,
    unavailable: DashMap<SubscriptionKey, String>,
    live: DashMap<SubscriptionKey, usize>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    max_live_per_key: AtomicUsize,
    settlements: Arc<Mutex<Vec<Settlement>>>,
    receive_window: Duration,
    max_delivery_count: u32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_receive_window(DEFAULT_RECEIVE_WINDOW)
    }

    /// Broker whose receivers return `Ok(None)` after `receive_window` without a message
    pub fn with_receive_window(receive_window: Duration) -> Self {
        Self {
            queues: DashMap::new(),
            unavailable: DashMap::new(),
            live: DashMap::new(),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            max_live_per_key: AtomicUsize::new(0),
            settlements: Arc::new(Mutex::new(Vec::new())),
            receive_window,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.max_delivery_count = max_delivery_count.max(1);
        self
    }

    fn queue_for(&self, key: &SubscriptionKey) -> Arc<SubscriptionQueue> {
        self.queues
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SubscriptionQueue::new()))
            .value()
            .clone()
    }

    /// Publish a message to a subscription
    pub fn publish(&self, key: &SubscriptionKey, message: ReceivedMessage) {
        let queue = self.queue_for(key);
        // The queue owns its receiver, so the channel cannot be closed here
        let _ = queue.sender.send(message);
    }

    /// Make every acquisition for `key` fail until [`restore`](Self::restore)
    pub fn fail_acquisitions(&self, key: &SubscriptionKey, reason: impl Into<String>) {
        self.unavailable.insert(key.clone(), reason.into());
    }

    pub fn restore(&self, key: &SubscriptionKey) {
        self.unavailable.remove(key);
    }

    /// Make the next receive call on `key` fail with a broker error
    pub fn fail_next_receive(&self, key: &SubscriptionKey, reason: impl Into<String>) {
        *self.queue_for(key).receive_failure.lock() = Some(reason.into());
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Handles acquired and not yet released
    pub fn live_handles(&self) -> usize {
        self.acquired_count().saturating_sub(self.released_count())
    }

    pub fn live_handles_for(&self, key: &SubscriptionKey) -> usize {
        self.live.get(key).map(|count| *count.value()).unwrap_or(0)
    }

    /// Highest number of simultaneously live handles ever seen for a single key
    pub fn max_live_per_key(&self) -> usize {
        self.max_live_per_key.load(Ordering::SeqCst)
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().clone()
    }

    pub fn settlements_of(&self, kind: SettlementKind) -> Vec<Settlement> {
        self.settlements
            .lock()
            .iter()
            .filter(|settlement| settlement.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReceiverFactory for InMemoryBroker {
    async fn acquire(
        &self,
        key: &SubscriptionKey,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn ReceiverHandle>, ReceiverError> {
        if cancel.is_cancelled() {
            return Err(ReceiverError::Cancelled);
        }

        let unavailable = self.unavailable.get(key).map(|reason| reason.value().clone());
        if let Some(reason) = unavailable {
            return Err(ReceiverError::unreachable(reason));
        }

        let queue = self.queue_for(key);
        let live_now = {
            let mut live = self.live.entry(key.clone()).or_insert(0);
            *live += 1;
            *live
        };
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.max_live_per_key.fetch_max(live_now, Ordering::SeqCst);

        debug!(topic = %key.topic_name(), subscription = %key.subscription_name(), "Receiver acquired");

        Ok(Box::new(InMemoryReceiver {
            key: key.clone(),
            queue,
            settlements: Arc::clone(&self.settlements),
            receive_window: self.receive_window,
            max_delivery_count: self.max_delivery_count,
        }))
    }

    async fn release(&self, handle: Box<dyn ReceiverHandle>) -> Result<(), ReceiverError> {
        let key = handle.key().clone();
        let released = match self.live.get_mut(&key) {
            Some(mut live) if *live > 0 => {
                *live -= 1;
                true
            }
            _ => false,
        };

        if !released {
            return Err(ReceiverError::internal(format!(
                "release of unknown receiver for {key}"
            )));
        }

        self.released.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %key.topic_name(), subscription = %key.subscription_name(), "Receiver released");
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryReceiver {
    key: SubscriptionKey,
    queue: Arc<SubscriptionQueue>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
    receive_window: Duration,
    max_delivery_count: u32,
}

impl InMemoryReceiver {
    fn record(&self, message: &ReceivedMessage, kind: SettlementKind) {
        self.settlements.lock().push(Settlement {
            key: self.key.clone(),
            message_id: message.message_id,
            kind,
        });
    }
}

#[async_trait]
impl ReceiverHandle for InMemoryReceiver {
    fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>, ReceiverError> {
        let injected = self.queue.receive_failure.lock().take();
        if let Some(reason) = injected {
            return Err(ReceiverError::unreachable(reason));
        }

        let mut receiver = self.queue.receiver.lock().await;
        match tokio::time::timeout(self.receive_window, receiver.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(ReceiverError::closed(format!("queue for {} closed", self.key))),
            Err(_) => Ok(None),
        }
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), ReceiverError> {
        self.record(message, SettlementKind::Completed);
        Ok(())
    }

    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), ReceiverError> {
        if message.delivery_count >= self.max_delivery_count {
            self.record(message, SettlementKind::DeadLettered);
            return Ok(());
        }

        self.record(message, SettlementKind::Abandoned);
        let mut redelivery = message.clone();
        redelivery.delivery_count += 1;
        self.queue
            .sender
            .send(redelivery)
            .map_err(|_| ReceiverError::Settlement {
                message_id: message.message_id.to_string(),
                message: "queue closed".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("orders", "sub-a")
    }

    #[tokio::test]
    async fn test_acquire_release_accounting() {
        let broker = InMemoryBroker::new();
        let cancel = CancellationToken::new();

        let first = broker.acquire(&key(), &cancel).await.unwrap();
        assert_eq!(broker.live_handles_for(&key()), 1);

        broker.release(first).await.unwrap();
        assert_eq!(broker.acquired_count(), 1);
        assert_eq!(broker.released_count(), 1);
        assert_eq!(broker.live_handles(), 0);
        assert_eq!(broker.max_live_per_key(), 1);
    }

    #[tokio::test]
    async fn test_acquisition_failure_injection() {
        let broker = InMemoryBroker::new();
        broker.fail_acquisitions(&key(), "subscription missing");

        let err = broker
            .acquire(&key(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ReceiverError::unreachable("subscription missing"));
        assert_eq!(broker.acquired_count(), 0);

        broker.restore(&key());
        assert!(broker.acquire(&key(), &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_receive_window_and_messages() {
        let broker = InMemoryBroker::with_receive_window(Duration::from_millis(10));
        let handle = broker.acquire(&key(), &CancellationToken::new()).await.unwrap();

        assert_eq!(handle.receive().await.unwrap(), None);

        let message = ReceivedMessage::new(b"hello".to_vec());
        broker.publish(&key(), message.clone());
        assert_eq!(handle.receive().await.unwrap(), Some(message));

        broker.fail_next_receive(&key(), "connection reset");
        assert!(matches!(
            handle.receive().await,
            Err(ReceiverError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_abandon_redelivers_until_dead_lettered() {
        let broker = InMemoryBroker::with_receive_window(Duration::from_millis(10))
            .with_max_delivery_count(2);
        let handle = broker.acquire(&key(), &CancellationToken::new()).await.unwrap();
        broker.publish(&key(), ReceivedMessage::new(b"poison".to_vec()));

        let first = handle.receive().await.unwrap().unwrap();
        handle.abandon(&first).await.unwrap();

        let second = handle.receive().await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
        handle.abandon(&second).await.unwrap();

        assert_eq!(handle.receive().await.unwrap(), None);
        assert_eq!(broker.settlements_of(SettlementKind::Abandoned).len(), 1);
        assert_eq!(broker.settlements_of(SettlementKind::DeadLettered).len(), 1);
    }
}
