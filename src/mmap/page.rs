//! Mapped Page
//!
//! A fixed-size read/write window onto one page file.
//!
//! All accessors take an ABSOLUTE offset in the logical file; the page
//! subtracts its own base offset. Touching bytes outside
//! `[offset, offset + len)` is a bug in the caller and panics.
//!
//! ## Byte Access
//! The mapping sits behind a `RwLock`. Reads share it; every write takes it
//! exclusively for the duration of the copy, so writes to one page are
//! serialized and block readers of that page while they run. Disjoint pages
//! never contend.
//!
//! ## Lifecycle Counters (lock-free)
//! - `ref_count`: `>= 0` while live, `-1` once collected. `garbage()` only
//!   succeeds from exactly 0, after which `acquire()` always fails.
//! - `timestamp`: last-use stamp for TTL eviction. Negative means pinned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use crossbeam::utils::Backoff;
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};

use crate::error::Result;

use super::now_millis;

/// Reference count value marking a page as collected
const COLLECTED: i32 = -1;

/// Reference state of a page, decoded from its counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    /// In use or idle; holds the number of outstanding references
    Live(u32),

    /// Claimed by the evictor; the page must be re-fetched from the factory
    Collected,
}

/// A single memory-mapped page
pub struct MappedPage {
    /// Page index within its directory
    index: u64,

    /// Absolute offset of the first byte of this page
    offset: u64,

    /// Page size in bytes
    len: usize,

    /// Backing file (for logging)
    path: PathBuf,

    /// The mapping; `None` once closed
    map: RwLock<Option<MmapMut>>,

    /// Set by every write, cleared by flush
    dirty: AtomicBool,

    /// Serializes flush/close
    flush_lock: Mutex<()>,

    ref_count: AtomicI32,
    timestamp: AtomicI64,
}

impl MappedPage {
    pub(crate) fn new(index: u64, offset: u64, path: PathBuf, map: MmapMut) -> Self {
        Self {
            index,
            offset,
            len: map.len(),
            path,
            map: RwLock::new(Some(map)),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
            ref_count: AtomicI32::new(0),
            timestamp: AtomicI64::new(now_millis()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Absolute offset of this page's first byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.map.read().is_none()
    }

    // =========================================================================
    // Typed Get/Put (big-endian)
    // =========================================================================

    pub fn put_long(&self, offset: u64, value: i64) {
        self.put_bytes(offset, &value.to_be_bytes());
    }

    pub fn get_long(&self, offset: u64) -> i64 {
        let mut buf = [0u8; 8];
        self.get_bytes(offset, &mut buf);
        i64::from_be_bytes(buf)
    }

    pub fn put_int(&self, offset: u64, value: i32) {
        self.put_bytes(offset, &value.to_be_bytes());
    }

    pub fn get_int(&self, offset: u64) -> i32 {
        let mut buf = [0u8; 4];
        self.get_bytes(offset, &mut buf);
        i32::from_be_bytes(buf)
    }

    /// Copy `src` into the page starting at absolute `offset`
    ///
    /// Partial ranges are expressed by slicing `src`.
    pub fn put_bytes(&self, offset: u64, src: &[u8]) {
        let start = self.local_index(offset, src.len());
        let mut guard = self.map.write();
        let map = match guard.as_mut() {
            Some(map) => map,
            None => panic!("write to closed page {}", self.path.display()),
        };
        map[start..start + src.len()].copy_from_slice(src);
        self.dirty.store(true, Ordering::Release);
    }

    /// Fill `dst` from the page starting at absolute `offset`
    pub fn get_bytes(&self, offset: u64, dst: &mut [u8]) {
        let start = self.local_index(offset, dst.len());
        let guard = self.map.read();
        let map = match guard.as_ref() {
            Some(map) => map,
            None => panic!("read from closed page {}", self.path.display()),
        };
        dst.copy_from_slice(&map[start..start + dst.len()]);
    }

    /// Translate an absolute offset into a local index, checking the range
    fn local_index(&self, offset: u64, width: usize) -> usize {
        let end = self.offset + self.len as u64;
        assert!(
            offset >= self.offset && offset + width as u64 <= end,
            "offset range [{}, {}) outside page {} [{}, {})",
            offset,
            offset + width as u64,
            self.index,
            self.offset,
            end
        );
        (offset - self.offset) as usize
    }

    // =========================================================================
    // Flush / Close
    // =========================================================================

    /// Force dirty bytes to stable storage; a closed page is a no-op
    pub fn flush(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let guard = self.map.read();
        match guard.as_ref() {
            Some(map) => self.flush_map(map),
            None => Ok(()),
        }
    }

    /// Flush, then release the mapping. Idempotent.
    pub fn close(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock();
        let mut guard = self.map.write();
        if let Some(map) = guard.as_ref() {
            self.flush_map(map)?;
        }
        // Dropping the MmapMut unmaps
        if guard.take().is_some() {
            tracing::trace!(page = self.index, "Unmapped page {}", self.path.display());
        }
        Ok(())
    }

    fn flush_map(&self, map: &MmapMut) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = map.flush() {
                self.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    /// Take a reference; fails once the page has been collected
    pub fn acquire(&self) -> bool {
        let backoff = Backoff::new();
        let mut current = self.ref_count.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return false;
            }
            match self.ref_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Drop a reference, returning the remaining count
    pub fn release(&self) -> i32 {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Claim an unreferenced page for collection
    ///
    /// Succeeds only from a count of exactly zero.
    pub fn garbage(&self) -> bool {
        self.ref_count
            .compare_exchange(0, COLLECTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn ref_state(&self) -> RefState {
        match self.ref_count() {
            n if n >= 0 => RefState::Live(n as u32),
            _ => RefState::Collected,
        }
    }

    // =========================================================================
    // Timestamp
    // =========================================================================

    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.timestamp() < 0
    }

    /// Advance the recency stamp; ignored while pinned or if not newer
    pub fn update_timestamp(&self, new_timestamp: i64) {
        let mut current = self.timestamp.load(Ordering::Acquire);
        while current >= 0 && current < new_timestamp {
            match self.timestamp.compare_exchange_weak(
                current,
                new_timestamp,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Pin the page against eviction
    pub fn lock_timestamp(&self) {
        let _ = self
            .timestamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(-t.abs()));
    }

    /// Unpin the page
    pub fn unlock_timestamp(&self) {
        let _ = self
            .timestamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(t.abs()));
    }
}

impl Drop for MappedPage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(page = self.index, error = %e, "Failed to flush page on drop");
        }
    }
}

impl fmt::Debug for MappedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedPage")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("dirty", &self.is_dirty())
            .field("closed", &self.is_closed())
            .field("ref_count", &self.ref_count())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}
