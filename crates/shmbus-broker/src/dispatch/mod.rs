//! Dispatcher module exports.
//!
//! Re-exports the request executor and the per-connection context so the
//! transport layer can depend on this module directly.

pub mod dispatcher;

pub use dispatcher::{execute, ConnCtx};
