//! Text codec (JSON) used for remote peers.

use bytes::Bytes;

use crate::error::{BrokerError, Result};
use crate::protocol::{Codec, CodecKind, Envelope};

#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Text
    }

    fn encode(&self, env: &Envelope) -> Result<Bytes> {
        serde_json::to_vec(env)
            .map(Bytes::from)
            .map_err(|e| BrokerError::Encode(format!("json encode failed: {e}")))
    }

    fn decode(&self, buf: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(buf)
            .map_err(|e| BrokerError::Decode(format!("invalid envelope json: {e}")))
    }
}
