//! Helpers shared by broker integration tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use shmbus_broker::config::BrokerConfig;
use shmbus_broker::pubsub::{ConnId, DeliverySink};
use shmbus_broker::transport::framing::frame_codec;
use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::{Codec, CodecKind, Envelope};

/// Shared log of (subscriber id, envelope) in delivery order.
pub type DeliveryLog = Arc<Mutex<Vec<(ConnId, Arc<Envelope>)>>>;

/// Records everything delivered to it.
pub struct RecordingSink {
    pub id: ConnId,
    pub log: DeliveryLog,
}

impl RecordingSink {
    pub fn new(id: ConnId, log: &DeliveryLog) -> Arc<Self> {
        Arc::new(Self {
            id,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn conn_id(&self) -> ConnId {
        self.id
    }

    async fn deliver(&self, env: Arc<Envelope>) -> Result<()> {
        self.try_deliver(env)
    }

    fn try_deliver(&self, env: Arc<Envelope>) -> Result<()> {
        self.log.lock().unwrap().push((self.id, env));
        Ok(())
    }
}

/// A subscriber whose socket is already gone.
pub struct ClosedSink {
    pub id: ConnId,
}

#[async_trait]
impl DeliverySink for ClosedSink {
    fn conn_id(&self) -> ConnId {
        self.id
    }

    async fn deliver(&self, env: Arc<Envelope>) -> Result<()> {
        self.try_deliver(env)
    }

    fn try_deliver(&self, _env: Arc<Envelope>) -> Result<()> {
        Err(BrokerError::Transport(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "closed",
        )))
    }
}

pub fn new_log() -> DeliveryLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Config bound to an ephemeral port with the shared buffer under `dir`.
pub fn test_config(dir: &Path) -> BrokerConfig {
    let mut cfg = BrokerConfig::default();
    cfg.broker.listen = "127.0.0.1:0".into();
    cfg.broker.drain_timeout_ms = 2000;
    cfg.shared_memory.dir = dir.to_path_buf();
    cfg.shared_memory.name = "test_shared_mem".into();
    cfg
}

/// Minimal framed client speaking one codec.
pub struct TestClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    codec: &'static dyn Codec,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, kind: CodecKind) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self::from_stream(stream, kind)
    }

    pub fn from_stream(stream: TcpStream, kind: CodecKind) -> Self {
        Self {
            framed: Framed::new(stream, frame_codec(1024 * 1024)),
            codec: kind.codec(),
        }
    }

    pub async fn send(&mut self, env: &Envelope) {
        let bytes = self.codec.encode(env).unwrap();
        self.framed.send(bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, raw: &[u8]) {
        self.framed.send(Bytes::copy_from_slice(raw)).await.unwrap();
    }

    /// Next envelope, or `None` when the broker closed the connection.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let next = timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for broker");
        match next {
            Some(Ok(frame)) => Some(self.codec.decode(&frame).unwrap()),
            _ => None,
        }
    }

    pub async fn request(&mut self, env: &Envelope) -> Envelope {
        self.send(env).await;
        self.recv().await.expect("connection closed before response")
    }
}
