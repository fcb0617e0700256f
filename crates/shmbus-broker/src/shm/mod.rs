//! Shared buffer: one fixed-capacity region shared with co-located processes.
//!
//! The region is a memory-mapped file (tmpfs by default) guarded by a lock
//! word that lives inside the mapping, so every process mapping the same name
//! takes the same mutex. It holds at most one payload; a second write before a
//! read overwrites the first.

mod buffer;
mod layout;
mod manager;

pub use buffer::{SharedBuffer, ShmGuard};
pub use layout::{bytes_for_buffer, ShmHeader, HEADER_SIZE, SHM_MAGIC, SHM_VERSION};
pub use manager::SharedMemory;
