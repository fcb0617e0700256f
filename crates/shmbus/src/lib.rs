//! Top-level facade crate for shmbus.
//!
//! Re-exports the protocol core and the broker library so users can depend on a single crate.

pub mod core {
    pub use shmbus_core::*;
}

pub mod broker {
    pub use shmbus_broker::*;
}
