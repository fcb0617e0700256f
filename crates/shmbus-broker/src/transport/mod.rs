//! Transport layer (TCP).
//!
//! Every peer speaks the same framing: an 8-byte big-endian length prefix
//! followed by one encoded envelope. The codec is picked once per connection
//! from its locality.

pub mod connection;
pub mod framing;
pub mod locality;

pub use connection::serve_connection;
pub use locality::{Locality, LocalityClassifier};
