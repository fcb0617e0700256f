use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use memmap2::MmapRaw;
use serde_json::Value;

use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::BinaryCodec;

use super::layout::{bytes_for_buffer, ShmHeader, HEADER_SIZE};

/// Spins before yielding the thread while waiting for the lock.
const SPINS_BEFORE_YIELD: u32 = 64;

/// A mapped shared buffer. Every handle mapping the same file shares one lock.
pub struct SharedBuffer {
    path: PathBuf,
    _file: File,
    map: MmapRaw,
    capacity: usize,
    lock_timeout: Duration,
}

impl SharedBuffer {
    /// Create the backing file and initialise the header.
    ///
    /// Fails if the file already exists: another owner may still have it
    /// mapped, and rewriting the header would reset a lock it holds.
    pub fn create(path: impl AsRef<Path>, capacity: usize, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => BrokerError::SharedMemory(format!(
                    "{} already exists; remove it if no other broker owns it",
                    path.display()
                )),
                _ => shm_err("create", &path, e),
            })?;
        file.set_len(bytes_for_buffer(capacity) as u64)
            .map_err(|e| shm_err("size", &path, e))?;

        let map = MmapRaw::map_raw(&file).map_err(|e| shm_err("map", &path, e))?;
        if map.len() < bytes_for_buffer(capacity) {
            return Err(BrokerError::SharedMemory("mapping shorter than requested".into()));
        }

        // SAFETY: the mapping is page aligned, at least HEADER_SIZE long and
        // not yet visible to anyone relying on its contents.
        unsafe { ptr::write(map.as_mut_ptr().cast::<ShmHeader>(), ShmHeader::new(capacity)) };

        Ok(Self {
            path,
            _file: file,
            map,
            capacity,
            lock_timeout,
        })
    }

    /// Map a buffer created by another handle or process.
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| shm_err("open", &path, e))?;

        let map = MmapRaw::map_raw(&file).map_err(|e| shm_err("map", &path, e))?;
        if map.len() < HEADER_SIZE {
            return Err(BrokerError::SharedMemory("file too small for header".into()));
        }

        // SAFETY: length checked above; header fields read here are immutable after create.
        let header = unsafe { &*map.as_ptr().cast::<ShmHeader>() };
        header.validate(map.len())?;
        let capacity = header.capacity as usize;

        Ok(Self {
            path,
            _file: file,
            map,
            capacity,
            lock_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn header(&self) -> &ShmHeader {
        // SAFETY: validated at construction; atomics make shared access sound.
        unsafe { &*self.map.as_ptr().cast::<ShmHeader>() }
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the mapping holds HEADER_SIZE + capacity bytes.
        unsafe { self.map.as_mut_ptr().add(HEADER_SIZE) }
    }

    /// Acquire the cross-process mutex, giving up after the lock timeout.
    pub fn lock(&self) -> Result<ShmGuard<'_>> {
        let lock = &self.header().lock;
        let started = Instant::now();
        let mut spins = 0u32;
        loop {
            if lock
                .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(ShmGuard { buf: self });
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(BrokerError::LockTimeout);
            }
            spins += 1;
            if spins < SPINS_BEFORE_YIELD {
                std::hint::spin_loop();
            } else {
                spins = 0;
                std::thread::yield_now();
            }
        }
    }

    /// Encode `payload` with the binary codec and store it, replacing whatever was there.
    pub fn write(&self, payload: &Value) -> Result<usize> {
        let bytes = BinaryCodec.encode_value(payload)?;
        self.write_bytes(&bytes)?;
        Ok(bytes.len())
    }

    /// Read and decode the current payload. An empty buffer reads as `null`.
    pub fn read(&self) -> Result<Value> {
        let bytes = self.read_bytes()?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        BinaryCodec.decode_value(&bytes)
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity {
            return Err(BrokerError::PayloadTooLarge {
                size: bytes.len(),
                capacity: self.capacity,
            });
        }
        let guard = self.lock()?;
        guard.store(bytes);
        Ok(())
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let guard = self.lock()?;
        guard.load()
    }

    /// Remove the backing file. Live mappings stay valid until dropped.
    pub fn unlink(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path).map_err(|e| shm_err("unlink", &path, e))
    }
}

/// Holds the buffer mutex; released on drop.
pub struct ShmGuard<'a> {
    buf: &'a SharedBuffer,
}

impl ShmGuard<'_> {
    fn store(&self, bytes: &[u8]) {
        let cap = self.buf.capacity;
        let data = self.buf.data_ptr();
        // SAFETY: we hold the lock; bytes.len() <= cap was checked by the caller.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
            ptr::write_bytes(data.add(bytes.len()), 0, cap - bytes.len());
        }
        self.buf
            .header()
            .len
            .store(bytes.len() as u64, Ordering::Relaxed);
    }

    fn load(&self) -> Result<Vec<u8>> {
        let len = self.buf.header().len.load(Ordering::Relaxed) as usize;
        if len > self.buf.capacity {
            return Err(BrokerError::SharedMemory(format!(
                "stored length {len} exceeds capacity {}",
                self.buf.capacity
            )));
        }
        let mut out = vec![0u8; len];
        // SAFETY: we hold the lock and len <= capacity.
        unsafe { ptr::copy_nonoverlapping(self.buf.data_ptr(), out.as_mut_ptr(), len) };
        Ok(out)
    }
}

impl Drop for ShmGuard<'_> {
    fn drop(&mut self) {
        self.buf.header().lock.store(0, Ordering::Release);
    }
}

fn shm_err(op: &str, path: &Path, e: io::Error) -> BrokerError {
    BrokerError::SharedMemory(format!("{op} {} failed: {e}", path.display()))
}
