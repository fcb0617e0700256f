use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use shmbus_core::protocol::MessageType;

/// Per-connection id, unique for the broker's lifetime.
pub type ConnId = u64;

/// A message handed to the registry by `SEND`.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub message_type: MessageType,
    pub payload: Value,
}

impl Published {
    pub fn new(message_type: MessageType, payload: Value) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(MessageType::Text, Value::String(payload.into()))
    }
}

/// One entry of a channel's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// Id of the notification that announced this message.
    pub message_id: Uuid,
    pub timestamp: String,
    pub message_type: MessageType,
    pub payload: Value,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Subscribers this notification did not reach.
    pub failed: Vec<ConnId>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}
