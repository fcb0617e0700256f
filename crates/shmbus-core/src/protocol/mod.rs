//! Protocol modules (envelope + the two wire codecs).
//!
//! - `envelope`: the canonical request/response/notification unit.
//! - `binary`: compact `bincode` codec for trusted local peers.
//! - `text`: JSON codec for remote peers.
//!
//! Framing (8-byte big-endian length prefix) is the transport's job; codecs
//! only turn one envelope into one frame body and back. Decoders never panic:
//! malformed input is reported as `BrokerError::Decode`.

pub mod binary;
pub mod envelope;
pub mod text;

use std::fmt;

use bytes::Bytes;

use crate::error::Result;

pub use binary::{BinaryCodec, MAX_VALUE_DEPTH};
pub use envelope::{Action, Envelope, MessageType, Status};
pub use text::TextCodec;

/// Length of the big-endian frame length prefix.
pub const FRAME_PREFIX_LEN: usize = 8;

/// One envelope encoding. Selected once per connection.
pub trait Codec: Send + Sync + fmt::Debug {
    fn kind(&self) -> CodecKind;
    fn encode(&self, env: &Envelope) -> Result<Bytes>;
    fn decode(&self, buf: &[u8]) -> Result<Envelope>;
}

/// Which codec a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// `bincode` envelopes (local peers).
    Binary,
    /// JSON envelopes (remote peers).
    Text,
}

static BINARY: BinaryCodec = BinaryCodec;
static TEXT: TextCodec = TextCodec;

impl CodecKind {
    /// Local peers get the binary codec, everyone else the text codec.
    pub fn for_locality(is_local: bool) -> Self {
        if is_local {
            CodecKind::Binary
        } else {
            CodecKind::Text
        }
    }

    pub fn codec(self) -> &'static dyn Codec {
        match self {
            CodecKind::Binary => &BINARY,
            CodecKind::Text => &TEXT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::Binary => "binary",
            CodecKind::Text => "text",
        }
    }
}
