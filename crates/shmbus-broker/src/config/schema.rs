use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::Deserialize;
use shmbus_core::error::{BrokerError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub version: u32,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub shared_memory: SharedMemorySection,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            broker: BrokerSection::default(),
            shared_memory: SharedMemorySection::default(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BrokerError::UnsupportedVersion);
        }
        self.broker.validate()?;
        self.shared_memory.validate()?;
        Ok(())
    }

    /// Apply the `HOST_IP` override (an address whose peers count as local).
    pub fn apply_host_ip_override(&mut self, raw: Option<&str>) -> Result<()> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        let ip: IpAddr = raw
            .parse()
            .map_err(|e| BrokerError::BadRequest(format!("HOST_IP is not an ip address: {e}")))?;
        self.broker.host_ip = Some(ip);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Peers connecting from this address are treated as local.
    #[serde(default)]
    pub host_ip: Option<IpAddr>,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// 0 keeps every message.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            host_ip: None,
            max_frame_bytes: default_max_frame_bytes(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl BrokerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if !(1024..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(BrokerError::BadRequest(
                "broker.max_frame_bytes must be between 1024 and 67108864".into(),
            ));
        }
        if !(1..=60000).contains(&self.delivery_timeout_ms) {
            return Err(BrokerError::BadRequest(
                "broker.delivery_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        if !(100..=600000).contains(&self.drain_timeout_ms) {
            return Err(BrokerError::BadRequest(
                "broker.drain_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| BrokerError::BadRequest(format!("broker.listen must be a valid SocketAddr: {e}")))
    }
}

fn default_listen() -> String {
    "127.0.0.1:8888".into()
}
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
fn default_delivery_timeout_ms() -> u64 {
    1500
}
fn default_drain_timeout_ms() -> u64 {
    5000
}
fn default_history_limit() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedMemorySection {
    #[serde(default = "default_shm_name")]
    pub name: String,

    /// Directory holding the backing file (tmpfs on Linux).
    #[serde(default = "default_shm_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_shm_capacity")]
    pub capacity: usize,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for SharedMemorySection {
    fn default() -> Self {
        Self {
            name: default_shm_name(),
            dir: default_shm_dir(),
            capacity: default_shm_capacity(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SharedMemorySection {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty()
            || self.name.contains('/')
            || self.name.contains('\\')
            || self.name.starts_with('.')
        {
            return Err(BrokerError::BadRequest(
                "shared_memory.name must be a plain, non-empty file name".into(),
            ));
        }
        if !(16..=64 * 1024 * 1024).contains(&self.capacity) {
            return Err(BrokerError::BadRequest(
                "shared_memory.capacity must be between 16 and 67108864".into(),
            ));
        }
        if !(1..=60000).contains(&self.lock_timeout_ms) {
            return Err(BrokerError::BadRequest(
                "shared_memory.lock_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

fn default_shm_name() -> String {
    "message_shared_mem".into()
}
fn default_shm_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}
fn default_shm_capacity() -> usize {
    1024
}
fn default_lock_timeout_ms() -> u64 {
    250
}
