//! Broker message as seen by a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A message pulled from a subscription, prior to settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: Uuid,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            body: body.into(),
            properties: HashMap::new(),
            delivery_count: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}
