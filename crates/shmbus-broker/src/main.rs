//! shmbus broker binary.
//!
//! - Config: `SHMBUS_CONFIG` (default `shmbus.yaml`), defaults if absent
//! - `HOST_IP` marks one more peer address as local
//! - Ctrl-C triggers the same graceful shutdown as `STOP`

use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use shmbus_broker::{config, Broker};

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("SHMBUS_CONFIG").unwrap_or_else(|_| "shmbus.yaml".to_string());
    let mut cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(%path, error = %e, "config load failed");
            return ExitCode::from(2);
        }
    };
    let host_ip = std::env::var("HOST_IP").ok();
    if let Err(e) = cfg.apply_host_ip_override(host_ip.as_deref()) {
        tracing::error!(error = %e, "invalid HOST_IP");
        return ExitCode::from(2);
    }

    let broker = match Broker::bind(cfg).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "broker failed to start");
            return ExitCode::FAILURE;
        }
    };

    let stop = broker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            stop.cancel();
        }
    });

    match broker.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "broker failed");
            ExitCode::FAILURE
        }
    }
}
