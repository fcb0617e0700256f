//! Binary layout of the shared buffer file.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬───────────┬──────────┬──────────────┐
//! │  magic   │ version  │ capacity │ lock (4B) │ pad (4B) │ len (8B)     │
//! │  (8B)    │  (8B)    │  (8B)    │  atomic   │          │  atomic      │
//! ├──────────┴──────────┴──────────┴───────────┴──────────┴──────────────┤
//! │                   data: `capacity` bytes                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

use shmbus_core::error::{BrokerError, Result};

/// ASCII "SHMBUSBF".
pub const SHM_MAGIC: u64 = 0x5348_4D42_5553_4246;

/// Bump on incompatible layout changes.
pub const SHM_VERSION: u64 = 1;

/// Header stored at offset 0 of the mapping.
#[repr(C)]
pub struct ShmHeader {
    pub magic: u64,
    pub version: u64,
    /// Size of the data region in bytes.
    pub capacity: u64,
    /// 0 = free, 1 = held.
    pub lock: AtomicU32,
    _pad: u32,
    /// Length of the payload currently stored. Only touched under `lock`.
    pub len: AtomicU64,
}

pub const HEADER_SIZE: usize = size_of::<ShmHeader>();

impl ShmHeader {
    pub fn new(capacity: usize) -> Self {
        Self {
            magic: SHM_MAGIC,
            version: SHM_VERSION,
            capacity: capacity as u64,
            lock: AtomicU32::new(0),
            _pad: 0,
            len: AtomicU64::new(0),
        }
    }

    /// Check a header found in an existing mapping of `mapped_len` bytes.
    pub fn validate(&self, mapped_len: usize) -> Result<()> {
        if self.magic != SHM_MAGIC {
            return Err(BrokerError::SharedMemory("bad magic".into()));
        }
        if self.version != SHM_VERSION {
            return Err(BrokerError::UnsupportedVersion);
        }
        if bytes_for_buffer(self.capacity as usize) > mapped_len {
            return Err(BrokerError::SharedMemory(
                "capacity exceeds mapped length".into(),
            ));
        }
        Ok(())
    }
}

/// Total bytes of the mapping for a data region of `capacity` bytes.
pub fn bytes_for_buffer(capacity: usize) -> usize {
    HEADER_SIZE + capacity
}
