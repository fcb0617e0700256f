use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use shmbus_core::error::{BrokerError, Result};

use crate::config::SharedMemorySection;

use super::buffer::SharedBuffer;

/// Broker-side owner of the shared buffer: toggles its existence and runs
/// blocking mutex waits off the async workers.
pub struct SharedMemory {
    cfg: SharedMemorySection,
    current: Mutex<Option<Arc<SharedBuffer>>>,
}

impl SharedMemory {
    pub fn new(cfg: SharedMemorySection) -> Self {
        Self {
            cfg,
            current: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_slot().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Create the buffer. Returns `false` if it already existed.
    pub fn enable(&self) -> Result<bool> {
        let mut slot = self.lock_slot()?;
        if slot.is_some() {
            return Ok(false);
        }
        let buf = SharedBuffer::create(
            self.cfg.path(),
            self.cfg.capacity,
            Duration::from_millis(self.cfg.lock_timeout_ms),
        )?;
        tracing::info!(path = %buf.path().display(), capacity = buf.capacity(), "shared memory enabled");
        *slot = Some(Arc::new(buf));
        Ok(true)
    }

    /// Unlink the buffer. Returns `false` if it was not enabled.
    pub fn disable(&self) -> Result<bool> {
        let Some(buf) = self.lock_slot()?.take() else {
            return Ok(false);
        };
        let path = self.cfg.path();
        // in-flight readers/writers keep their own mapping alive
        match Arc::try_unwrap(buf) {
            Ok(buf) => buf.unlink()?,
            Err(_shared) => std::fs::remove_file(&path).map_err(|e| {
                BrokerError::SharedMemory(format!("unlink {} failed: {e}", path.display()))
            })?,
        }
        tracing::info!(path = %path.display(), "shared memory disabled");
        Ok(true)
    }

    pub async fn write(&self, payload: Value) -> Result<usize> {
        let buf = self.current()?;
        tokio::task::spawn_blocking(move || buf.write(&payload))
            .await
            .map_err(|e| BrokerError::Internal(format!("shared memory write task failed: {e}")))?
    }

    pub async fn read(&self) -> Result<Value> {
        let buf = self.current()?;
        tokio::task::spawn_blocking(move || buf.read())
            .await
            .map_err(|e| BrokerError::Internal(format!("shared memory read task failed: {e}")))?
    }

    fn current(&self) -> Result<Arc<SharedBuffer>> {
        self.lock_slot()?
            .as_ref()
            .cloned()
            .ok_or(BrokerError::SharedMemoryDisabled)
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<Arc<SharedBuffer>>>> {
        self.current
            .lock()
            .map_err(|_| BrokerError::Internal("shared memory state poisoned".into()))
    }
}
