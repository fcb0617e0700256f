//! Envelope: the unit exchanged between peers and the broker.
//!
//! Requests carry no `message_id`; every envelope the broker emits gets a
//! fresh v4 id and a local wall-clock timestamp. The payload is an arbitrary
//! JSON-like value. Older clients send it as `message` and the timestamp as
//! `time`; both spellings are accepted on input.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::BrokerError;

/// Timestamp format used on broker-originated envelopes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Request / response / notification kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    CreateChannel,
    Subscribe,
    Send,
    GetMessage,
    GetMessages,
    ClearMessages,
    ReadSharedMemory,
    EnableSharedMemory,
    DisableSharedMemory,
    Stop,
    /// Broker reply to a request.
    Response,
    /// Broker push to a subscriber.
    Notification,
    /// Anything else; answered with an "unknown command" response.
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::CreateChannel => "CREATE_CHANNEL",
            Action::Subscribe => "SUBSCRIBE",
            Action::Send => "SEND",
            Action::GetMessage => "GET_MESSAGE",
            Action::GetMessages => "GET_MESSAGES",
            Action::ClearMessages => "CLEAR_MESSAGES",
            Action::ReadSharedMemory => "READ_SHARED_MEMORY",
            Action::EnableSharedMemory => "ENABLE_SHARED_MEMORY",
            Action::DisableSharedMemory => "DISABLE_SHARED_MEMORY",
            Action::Stop => "STOP",
            Action::Response => "response",
            Action::Notification => "notification",
            Action::Unknown(s) => s.as_str(),
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CREATE_CHANNEL" => Action::CreateChannel,
            "SUBSCRIBE" => Action::Subscribe,
            "SEND" => Action::Send,
            "GET_MESSAGE" => Action::GetMessage,
            "GET_MESSAGES" => Action::GetMessages,
            "CLEAR_MESSAGES" => Action::ClearMessages,
            "READ_SHARED_MEMORY" => Action::ReadSharedMemory,
            "ENABLE_SHARED_MEMORY" => Action::EnableSharedMemory,
            "DISABLE_SHARED_MEMORY" => Action::DisableSharedMemory,
            "STOP" => Action::Stop,
            "response" => Action::Response,
            "notification" => Action::Notification,
            _ => Action::Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        match a {
            Action::Unknown(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload kind hint carried alongside the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    /// Structured / binary-class object.
    Class,
}

/// Outcome marker on responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(default, alias = "time", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, alias = "message")]
    pub payload: Value,
}

impl Envelope {
    /// Client-side request (no id, no timestamp).
    pub fn request(action: Action, channel: Option<&str>, payload: Value) -> Self {
        Self {
            action,
            channel: channel.map(str::to_string),
            message_type: MessageType::Text,
            message_id: None,
            timestamp: None,
            status: Status::Ok,
            payload,
        }
    }

    /// Broker-originated envelope: fresh id + local timestamp.
    pub fn broker(action: Action, channel: Option<&str>, message_type: MessageType, payload: Value) -> Self {
        Self {
            action,
            channel: channel.map(str::to_string),
            message_type,
            message_id: Some(Uuid::new_v4()),
            timestamp: Some(now_timestamp()),
            status: Status::Ok,
            payload,
        }
    }

    /// Successful response with a confirmation text.
    pub fn response_text(channel: Option<&str>, text: impl Into<String>) -> Self {
        Self::broker(Action::Response, channel, MessageType::Text, Value::String(text.into()))
    }

    /// Successful response carrying a structured value.
    pub fn response_value(channel: Option<&str>, message_type: MessageType, payload: Value) -> Self {
        Self::broker(Action::Response, channel, message_type, payload)
    }

    /// Failed response: `{"code", "msg"}` payload and `status: error`.
    pub fn error_response(channel: Option<&str>, err: &BrokerError) -> Self {
        let mut env = Self::broker(
            Action::Response,
            channel,
            MessageType::Text,
            json!({
                "code": err.client_code().as_str(),
                "msg": err.to_string(),
            }),
        );
        env.status = Status::Error;
        env
    }

    /// Push to a subscriber.
    pub fn notification(channel: &str, message_type: MessageType, payload: Value) -> Self {
        Self::broker(Action::Notification, Some(channel), message_type, payload)
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Broker-local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
