use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::{Action, Envelope, MessageType, Status};

use crate::app_state::BrokerState;
use crate::pubsub::{ConnId, DeliverySink, Published, SubscribeOutcome};
use crate::transport::Locality;

/// Channel name used on shared-memory responses.
const SHARED_MEMORY_CHANNEL: &str = "shared_memory";
/// Channel name used on broker-scoped responses.
const SERVER_CHANNEL: &str = "server";

/// What the dispatcher knows about the requesting connection.
#[derive(Clone)]
pub struct ConnCtx {
    conn_id: ConnId,
    locality: Locality,
    sink: Arc<dyn DeliverySink>,
}

impl ConnCtx {
    pub fn new(conn_id: ConnId, locality: Locality, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            conn_id,
            locality,
            sink,
        }
    }
}

/// Execute one request and build its response.
///
/// Every effect on the registry or shared buffer completes before this
/// returns. Failures become `status: error` responses; they never end the
/// connection.
pub async fn execute(state: &BrokerState, conn: &ConnCtx, req: Envelope) -> Envelope {
    let action = req.action.clone();
    let channel = req.channel.clone();
    match handle(state, conn, req).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(action = %action, error = %e, "request failed");
            Envelope::error_response(channel.as_deref(), &e)
        }
    }
}

async fn handle(state: &BrokerState, conn: &ConnCtx, req: Envelope) -> Result<Envelope> {
    match req.action {
        Action::CreateChannel => {
            let name = require_channel(&req)?;
            state.registry().create(name);
            Ok(Envelope::response_text(Some(name), format!("channel {name} created")))
        }

        Action::Subscribe => {
            let name = require_channel(&req)?;
            match state.registry().subscribe(name, Arc::clone(&conn.sink)) {
                SubscribeOutcome::Subscribed => {
                    tracing::info!(channel = %name, "subscribed");
                }
                SubscribeOutcome::AlreadySubscribed => {}
                // confirmed anyway; nothing will ever be delivered
                SubscribeOutcome::NoSuchChannel => {
                    tracing::debug!(channel = %name, "subscribe to unknown channel ignored");
                }
            }
            Ok(Envelope::response_text(Some(name), format!("subscribed to {name}")))
        }

        Action::Send => {
            let name = require_channel(&req)?.to_string();
            let message = Published::new(req.message_type, req.payload);
            let is_local = conn.locality.is_local();

            if is_local {
                let written = state.shared_memory().write(message.payload.clone()).await?;
                tracing::debug!(channel = %name, bytes = written, "message stored in shared memory");
            }

            let report = state
                .registry()
                .record_and_fanout(&name, message, is_local, Some(conn.conn_id))
                .await;
            match report {
                Some(report) => {
                    tracing::debug!(channel = %name, delivered = report.delivered, failed = report.failed.len(), "message published");
                }
                None => {
                    tracing::debug!(channel = %name, "send to unknown channel ignored");
                }
            }
            Ok(Envelope::response_text(Some(&name), format!("message sent to {name}")))
        }

        Action::GetMessage => {
            let name = require_channel(&req)?;
            let id = requested_message_id(&req.payload)?;
            let record = state.registry().get_message(name, id)?;
            let message_type = record.message_type;
            Ok(Envelope::response_value(Some(name), message_type, to_value(&record)?))
        }

        Action::GetMessages => {
            let name = require_channel(&req)?;
            let history = state.registry().history(name)?;
            Ok(Envelope::response_value(Some(name), MessageType::Class, to_value(&history)?))
        }

        Action::ClearMessages => {
            let name = require_channel(&req)?;
            let n = state.registry().clear_history(name)?;
            Ok(Envelope::response_text(Some(name), format!("cleared {n} messages from {name}")))
        }

        Action::ReadSharedMemory => {
            let value = state.shared_memory().read().await?;
            Ok(Envelope::response_value(Some(SHARED_MEMORY_CHANNEL), MessageType::Class, value))
        }

        Action::EnableSharedMemory => {
            state.shared_memory().enable()?;
            Ok(Envelope::response_text(Some(SHARED_MEMORY_CHANNEL), "shared memory enabled"))
        }

        Action::DisableSharedMemory => {
            state.shared_memory().disable()?;
            Ok(Envelope::response_text(Some(SHARED_MEMORY_CHANNEL), "shared memory disabled"))
        }

        Action::Stop => {
            state.begin_shutdown();
            Ok(Envelope::response_text(Some(SERVER_CHANNEL), "broker stopped"))
        }

        Action::Response | Action::Notification | Action::Unknown(_) => {
            tracing::debug!(action = %req.action, "unknown command");
            let mut resp = Envelope::response_text(Some("unknown"), "unknown command");
            resp.status = Status::Error;
            Ok(resp)
        }
    }
}

fn require_channel(req: &Envelope) -> Result<&str> {
    req.channel()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BrokerError::BadRequest(format!("{} requires a channel", req.action)))
}

/// `{"message_id": "<uuid>"}` selects a record; null or absent means latest.
fn requested_message_id(payload: &Value) -> Result<Option<Uuid>> {
    match payload.get("message_id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|e| BrokerError::BadRequest(format!("invalid message_id: {e}"))),
        Some(other) => Err(BrokerError::BadRequest(format!(
            "message_id must be a string, got {other}"
        ))),
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v).map_err(|e| BrokerError::Encode(format!("json encode failed: {e}")))
}
