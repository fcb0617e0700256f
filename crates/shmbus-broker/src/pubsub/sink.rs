use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Duration};

use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::{Codec, Envelope};

use crate::transport::framing::encode_bounded;

use super::types::ConnId;

/// A subscriber as seen by the delivery engine.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn conn_id(&self) -> ConnId;

    /// Queue `env`, waiting for room up to the sink's own timeout.
    async fn deliver(&self, env: Arc<Envelope>) -> Result<()>;

    /// Queue `env` only if that can be done without waiting.
    ///
    /// Used for the publisher's own subscription: its connection is busy
    /// executing the request and cannot drain its queue meanwhile.
    fn try_deliver(&self, env: Arc<Envelope>) -> Result<()>;
}

/// Outbound queue of one connection.
///
/// Envelopes are encoded with the connection's codec before they are queued,
/// so a notification that cannot be framed fails here and never reaches the
/// socket.
#[derive(Clone)]
pub struct ConnectionSink {
    conn_id: ConnId,
    tx: mpsc::Sender<Bytes>,
    codec: &'static dyn Codec,
    max_frame_bytes: usize,
    timeout: Duration,
}

impl ConnectionSink {
    pub fn new(
        conn_id: ConnId,
        tx: mpsc::Sender<Bytes>,
        codec: &'static dyn Codec,
        max_frame_bytes: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            conn_id,
            tx,
            codec,
            max_frame_bytes,
            timeout,
        }
    }

    fn frame(&self, env: &Envelope) -> Result<Bytes> {
        encode_bounded(self.codec, env, self.max_frame_bytes)
    }
}

fn closed() -> BrokerError {
    BrokerError::Transport(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "subscriber connection closed",
    ))
}

#[async_trait]
impl DeliverySink for ConnectionSink {
    fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    async fn deliver(&self, env: Arc<Envelope>) -> Result<()> {
        let frame = self.frame(&env)?;
        match timeout(self.timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(closed()),
            Err(_) => Err(BrokerError::Transport(io::Error::new(
                io::ErrorKind::TimedOut,
                "subscriber queue full",
            ))),
        }
    }

    fn try_deliver(&self, env: Arc<Envelope>) -> Result<()> {
        let frame = self.frame(&env)?;
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(closed()),
            // the connection is alive; it just has a backlog
            Err(TrySendError::Full(_)) => Err(BrokerError::Internal(
                "own outbound queue full, notification dropped".into(),
            )),
        }
    }
}
