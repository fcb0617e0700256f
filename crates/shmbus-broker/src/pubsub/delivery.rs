use std::sync::Arc;

use serde_json::{json, Value};

use shmbus_core::protocol::Envelope;

use super::registry::ChannelRegistry;
use super::types::{ConnId, DeliveryReport, Published};

/// `message_location` value telling subscribers to `READ_SHARED_MEMORY`.
pub const SHARED_MEMORY_LOCATION: &str = "shared_memory";

/// Build the notification for one published message.
///
/// A local publisher's message went to the shared buffer, so every subscriber
/// gets the same pointer notification whatever its own locality. A remote
/// publisher's message is delivered inline.
pub fn notification_for(channel: &str, message: &Published, is_local: bool) -> Envelope {
    let payload: Value = if is_local {
        json!({ "message_location": SHARED_MEMORY_LOCATION })
    } else {
        message.payload.clone()
    };
    Envelope::notification(channel, message.message_type, payload)
}

/// Write `notification` to every current subscriber of `channel`, in
/// subscription order.
///
/// A failed write is logged and never stops delivery to the rest. Subscribers
/// whose connection is gone are pruned; one that only missed this
/// notification (too large for a frame, full queue) stays subscribed.
/// `publisher` is not awaited on: its own queue is only drained after the
/// request completes.
pub async fn deliver(
    registry: &ChannelRegistry,
    channel: &str,
    notification: Arc<Envelope>,
    publisher: Option<ConnId>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    // snapshot: no map guard is held across an await
    let Some(subscribers) = registry.subscribers(channel) else {
        return report;
    };

    let mut dead = Vec::new();
    for sub in subscribers {
        let env = Arc::clone(&notification);
        let sent = if Some(sub.conn_id()) == publisher {
            sub.try_deliver(env)
        } else {
            sub.deliver(env).await
        };
        match sent {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::warn!(channel = %channel, conn_id = sub.conn_id(), error = %e, "delivery to subscriber failed");
                if e.is_fatal_for_connection() {
                    dead.push(sub.conn_id());
                }
                report.failed.push(sub.conn_id());
            }
        }
    }

    for id in dead {
        registry.unsubscribe(channel, id);
    }

    tracing::debug!(channel = %channel, delivered = report.delivered, failed = report.failed.len(), "fan-out complete");
    report
}
