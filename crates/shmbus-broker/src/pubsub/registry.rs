use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use shmbus_core::error::{BrokerError, Result};

use super::delivery::{deliver, notification_for};
use super::sink::DeliverySink;
use super::types::{ConnId, DeliveryReport, HistoryRecord, Published};

struct Channel {
    /// Insertion order is delivery order.
    subscribers: Vec<Arc<dyn DeliverySink>>,
    history: VecDeque<HistoryRecord>,
}

impl Channel {
    fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            history: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
    /// The channel does not exist; nothing was recorded.
    NoSuchChannel,
}

/// Channel registry: `name -> (subscribers, history)`.
///
/// Channels live for the broker's lifetime. Dead subscribers are removed
/// eagerly on disconnect (`unsubscribe_all`) and lazily after a failed write.
pub struct ChannelRegistry {
    channels: DashMap<String, Channel>,
    history_limit: usize,
}

impl ChannelRegistry {
    /// `history_limit == 0` keeps every message.
    pub fn new(history_limit: usize) -> Self {
        Self {
            channels: DashMap::new(),
            history_limit,
        }
    }

    /// Idempotent insert. Returns `true` if the channel was created now.
    pub fn create(&self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            return false;
        }
        let mut created = false;
        self.channels.entry(name.to_string()).or_insert_with(|| {
            created = true;
            Channel::new()
        });
        if created {
            tracing::info!(channel = %name, "channel created");
        }
        created
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn subscribe(&self, name: &str, sink: Arc<dyn DeliverySink>) -> SubscribeOutcome {
        let Some(mut ch) = self.channels.get_mut(name) else {
            return SubscribeOutcome::NoSuchChannel;
        };
        let id = sink.conn_id();
        if ch.subscribers.iter().any(|s| s.conn_id() == id) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        ch.subscribers.push(sink);
        SubscribeOutcome::Subscribed
    }

    pub fn subscriber_ids(&self, name: &str) -> Vec<ConnId> {
        self.channels
            .get(name)
            .map(|ch| ch.subscribers.iter().map(|s| s.conn_id()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the subscriber list, in delivery order.
    pub fn subscribers(&self, name: &str) -> Option<Vec<Arc<dyn DeliverySink>>> {
        self.channels.get(name).map(|ch| ch.subscribers.clone())
    }

    pub fn unsubscribe(&self, name: &str, conn_id: ConnId) -> bool {
        let Some(mut ch) = self.channels.get_mut(name) else {
            return false;
        };
        let before = ch.subscribers.len();
        ch.subscribers.retain(|s| s.conn_id() != conn_id);
        ch.subscribers.len() != before
    }

    /// Drop a closed connection from every channel. Returns how many lists it left.
    pub fn unsubscribe_all(&self, conn_id: ConnId) -> usize {
        let mut removed = 0;
        for mut ch in self.channels.iter_mut() {
            let before = ch.subscribers.len();
            ch.subscribers.retain(|s| s.conn_id() != conn_id);
            removed += before - ch.subscribers.len();
        }
        removed
    }

    /// Append to history. Returns `false` if the channel does not exist.
    pub fn record(&self, name: &str, record: HistoryRecord) -> bool {
        let Some(mut ch) = self.channels.get_mut(name) else {
            return false;
        };
        ch.history.push_back(record);
        if self.history_limit > 0 {
            while ch.history.len() > self.history_limit {
                ch.history.pop_front();
            }
        }
        true
    }

    /// Record `message` and fan it out. `None` if the channel does not exist.
    ///
    /// `is_local` means the publisher was local: subscribers get a pointer to
    /// the shared buffer instead of the message itself. `publisher` is the
    /// sending connection, if any.
    pub async fn record_and_fanout(
        &self,
        name: &str,
        message: Published,
        is_local: bool,
        publisher: Option<ConnId>,
    ) -> Option<DeliveryReport> {
        let notification = notification_for(name, &message, is_local);
        let record = HistoryRecord {
            message_id: notification.message_id.unwrap_or_else(Uuid::new_v4),
            timestamp: notification.timestamp.clone().unwrap_or_default(),
            message_type: message.message_type,
            payload: message.payload,
        };
        if !self.record(name, record) {
            return None;
        }
        Some(deliver(self, name, Arc::new(notification), publisher).await)
    }

    pub fn history(&self, name: &str) -> Result<Vec<HistoryRecord>> {
        self.channels
            .get(name)
            .map(|ch| ch.history.iter().cloned().collect())
            .ok_or_else(|| BrokerError::ChannelNotFound(name.to_string()))
    }

    /// The record with `message_id`, or the latest one when `None`.
    pub fn get_message(&self, name: &str, message_id: Option<Uuid>) -> Result<HistoryRecord> {
        let ch = self
            .channels
            .get(name)
            .ok_or_else(|| BrokerError::ChannelNotFound(name.to_string()))?;
        let found = match message_id {
            Some(id) => ch.history.iter().rev().find(|r| r.message_id == id),
            None => ch.history.back(),
        };
        found.cloned().ok_or_else(|| match message_id {
            Some(id) => BrokerError::BadRequest(format!("no message {id} in channel {name}")),
            None => BrokerError::BadRequest(format!("channel {name} has no messages")),
        })
    }

    /// Empty the history. Returns how many records were dropped.
    pub fn clear_history(&self, name: &str) -> Result<usize> {
        let mut ch = self
            .channels
            .get_mut(name)
            .ok_or_else(|| BrokerError::ChannelNotFound(name.to_string()))?;
        let n = ch.history.len();
        ch.history.clear();
        Ok(n)
    }
}
