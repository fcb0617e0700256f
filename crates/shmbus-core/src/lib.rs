//! shmbus core: transport-agnostic protocol primitives and the shared error type.
//!
//! This crate defines the envelope, its two wire codecs and the error surface
//! shared by the broker and client tooling. It carries no runtime or socket
//! dependencies so it can be reused by any process that speaks the protocol.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `BrokerError`/`Result` so a malformed frame from a peer never
//! takes the broker down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{BrokerError, ClientCode, Result};
