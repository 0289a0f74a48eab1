//! Dispatcher doubles that record what the workers hand to the workflow runtime

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::Notify;
use uuid::Uuid;

use subscription_orchestrator::messaging::{DispatchError, MessageDispatcher};
use subscription_orchestrator::models::{ReceivedMessage, SubscriptionKey};

#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<(SubscriptionKey, Uuid)>>,
    rejecting: Mutex<HashSet<Vec<u8>>>,
    panicking: Mutex<HashSet<Vec<u8>>>,
    holding: Mutex<HashSet<Vec<u8>>>,
    held_entered: Notify,
    held_release: Notify,
}

impl RecordingDispatcher {
    /// Reject every message whose body equals `body`
    pub fn reject_body(&self, body: &[u8]) {
        self.rejecting.lock().insert(body.to_vec());
    }

    /// Panic inside the worker for every message whose body equals `body`
    pub fn panic_on_body(&self, body: &[u8]) {
        self.panicking.lock().insert(body.to_vec());
    }

    /// Park dispatch of every message whose body equals `body` until
    /// [`release_held`](Self::release_held) is called
    pub fn hold_body(&self, body: &[u8]) {
        self.holding.lock().insert(body.to_vec());
    }

    /// Resolves once a held message has entered dispatch
    pub async fn held_entered(&self) {
        self.held_entered.notified().await;
    }

    /// Let one parked dispatch finish
    pub fn release_held(&self) {
        self.held_release.notify_one();
    }

    pub fn dispatched(&self) -> Vec<(SubscriptionKey, Uuid)> {
        self.dispatched.lock().clone()
    }

    pub fn dispatched_for(&self, key: &SubscriptionKey) -> usize {
        self.dispatched.lock().iter().filter(|(k, _)| k == key).count()
    }
}

#[async_trait]
impl MessageDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        key: &SubscriptionKey,
        message: &ReceivedMessage,
    ) -> Result<(), DispatchError> {
        if self.panicking.lock().contains(&message.body) {
            panic!("dispatcher blew up on {}", message.message_id);
        }
        if self.rejecting.lock().contains(&message.body) {
            return Err(DispatchError::rejected(message.message_id, "workflow rejected input"));
        }
        let held = self.holding.lock().contains(&message.body);
        if held {
            self.held_entered.notify_one();
            self.held_release.notified().await;
        }
        self.dispatched.lock().push((key.clone(), message.message_id));
        Ok(())
    }
}
