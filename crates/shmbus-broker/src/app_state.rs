//! Shared broker state handed to every connection task.
//!
//! One owned registry and one shared-memory owner per broker; no globals.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use shmbus_core::error::Result;

use crate::config::BrokerConfig;
use crate::pubsub::{ChannelRegistry, ConnId};
use crate::shm::SharedMemory;
use crate::transport::{Locality, LocalityClassifier};

#[derive(Clone)]
pub struct BrokerState {
    inner: Arc<BrokerStateInner>,
    registry: Arc<ChannelRegistry>,
    shm: Arc<SharedMemory>,
}

struct BrokerStateInner {
    cfg: BrokerConfig,
    locality: LocalityClassifier,
    shutdown: CancellationToken,
    conn_seq: AtomicU64,
}

impl BrokerState {
    pub fn new(cfg: BrokerConfig) -> Result<Self> {
        cfg.validate()?;

        let registry = Arc::new(ChannelRegistry::new(cfg.broker.history_limit));
        let shm = Arc::new(SharedMemory::new(cfg.shared_memory.clone()));
        let locality = LocalityClassifier::new(cfg.broker.host_ip);

        Ok(Self {
            inner: Arc::new(BrokerStateInner {
                cfg,
                locality,
                shutdown: CancellationToken::new(),
                conn_seq: AtomicU64::new(1),
            }),
            registry,
            shm,
        })
    }

    pub fn cfg(&self) -> &BrokerConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shared_memory(&self) -> Arc<SharedMemory> {
        Arc::clone(&self.shm)
    }

    pub fn classify(&self, peer: IpAddr) -> Locality {
        self.inner.locality.classify(peer)
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.inner.conn_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting, let connections finish their current request, and drop
    /// the shared buffer.
    pub fn begin_shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            tracing::info!("broker shutdown requested");
        }
        self.inner.shutdown.cancel();
        if let Err(e) = self.shm.disable() {
            tracing::warn!(error = %e, "failed to disable shared memory on shutdown");
        }
    }
}
