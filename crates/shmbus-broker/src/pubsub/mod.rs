//! Pub/sub core: channel registry and the delivery engine.
//!
//! The registry owns channel name -> (subscribers, history). Delivery fans a
//! published message out to every subscriber in subscription order.

mod delivery;
mod registry;
mod sink;
mod types;

pub use delivery::{deliver, notification_for, SHARED_MEMORY_LOCATION};
pub use registry::{ChannelRegistry, SubscribeOutcome};
pub use sink::{ConnectionSink, DeliverySink};
pub use types::{ConnId, DeliveryReport, HistoryRecord, Published};
