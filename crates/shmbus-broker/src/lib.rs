//! shmbus broker library entry.
//!
//! Wires config, the channel registry and delivery engine, the shared buffer,
//! the per-connection dispatcher and the listener lifecycle into one broker.
//! Consumed by the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod pubsub;
pub mod server;
pub mod shm;
pub mod transport;

pub use app_state::BrokerState;
pub use server::Broker;
