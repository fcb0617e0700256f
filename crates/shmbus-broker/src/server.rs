//! Broker lifecycle: listener, connection tasks, shutdown.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use shmbus_core::error::{BrokerError, Result};

use crate::app_state::BrokerState;
use crate::config::BrokerConfig;
use crate::transport::serve_connection;

pub struct Broker {
    state: BrokerState,
    listener: TcpListener,
}

impl Broker {
    /// Validate config and bind the listener. Bind failure is returned to the caller.
    pub async fn bind(cfg: BrokerConfig) -> Result<Self> {
        let listen = cfg.broker.listen_addr()?;
        let state = BrokerState::new(cfg)?;
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| BrokerError::Transport(io::Error::new(e.kind(), format!("bind {listen} failed: {e}"))))?;
        Ok(Self { state, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> BrokerState {
        self.state.clone()
    }

    /// Cancelling this token has the same effect as a `STOP` request.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.state.shutdown_token()
    }

    /// Accept until shutdown, then drain open connections.
    pub async fn run(self) -> Result<()> {
        let Broker { state, listener } = self;
        let shutdown = state.shutdown_token();
        let mut conns = JoinSet::new();

        tracing::info!(listen = %listener.local_addr()?, "shmbus-broker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let locality = state.classify(peer.ip());
                            conns.spawn(serve_connection(state.clone(), stream, peer, locality));
                        }
                        // per-connection failures never stop the listener
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }

                Some(done) = conns.join_next(), if !conns.is_empty() => {
                    if let Err(e) = done {
                        tracing::error!(error = %e, "connection task panicked");
                    }
                }
            }
        }

        drop(listener);

        let drain = Duration::from_millis(state.cfg().broker.drain_timeout_ms);
        tracing::info!(open = conns.len(), "draining connections");
        let drained = timeout(drain, async {
            while conns.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = conns.len(), "drain timeout, aborting connections");
            conns.abort_all();
        }

        // also covers shutdown via the token rather than STOP
        state.begin_shutdown();
        tracing::info!("shmbus-broker stopped");
        Ok(())
    }
}
