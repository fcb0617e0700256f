//! Broker config loader (strict parsing).

pub mod schema;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use shmbus_core::error::{BrokerError, Result};

pub use schema::{BrokerConfig, BrokerSection, SharedMemorySection};

pub fn load_from_file(path: &str) -> Result<BrokerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BrokerError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BrokerConfig> {
    let cfg: BrokerConfig = serde_yaml::from_str(s)
        .map_err(|e| BrokerError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load `path` if it exists, otherwise fall back to validated defaults.
pub fn load_or_default(path: &str) -> Result<BrokerConfig> {
    match fs::metadata(Path::new(path)) {
        Ok(_) => load_from_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(%path, "config file not found, using defaults");
            let cfg = BrokerConfig::default();
            cfg.validate()?;
            Ok(cfg)
        }
        Err(e) => Err(BrokerError::Internal(format!("stat config failed: {e}"))),
    }
}
