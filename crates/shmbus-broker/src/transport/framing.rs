//! Length-prefixed framing shared by every connection.

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::{Codec, Envelope, FRAME_PREFIX_LEN};

pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_PREFIX_LEN)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

pub fn framed(stream: TcpStream, max_frame_bytes: usize) -> Framed<TcpStream, LengthDelimitedCodec> {
    Framed::new(stream, frame_codec(max_frame_bytes))
}

/// Encode `env` and check it fits in one outbound frame.
///
/// The frame limit applies in both directions; an oversize body would make
/// the framed sink fail and take the connection down with it.
pub fn encode_bounded(codec: &dyn Codec, env: &Envelope, max_frame_bytes: usize) -> Result<Bytes> {
    let body = codec.encode(env)?;
    if body.len() > max_frame_bytes {
        return Err(BrokerError::PayloadTooLarge {
            size: body.len(),
            capacity: max_frame_bytes,
        });
    }
    Ok(body)
}
