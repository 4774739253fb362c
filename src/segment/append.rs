//! Append Segment
//!
//! Write-once payload log with a monotonically increasing cursor.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::mmap::MemoryMappedFile;

/// Append-only store of message payloads
///
/// ## Concurrency:
/// - `cursor`: atomic reservation, so concurrent appenders never overlap
/// - Reads by offset are stable regardless of later appends
pub struct AppendSegment {
    file: MemoryMappedFile,

    /// Next offset to hand out
    cursor: AtomicU64,
}

impl AppendSegment {
    pub fn new(file: MemoryMappedFile) -> Self {
        Self {
            file,
            cursor: AtomicU64::new(0),
        }
    }

    /// Start from an empty file, discarding existing pages
    pub fn initialize_new(&self) -> Result<()> {
        self.file.reset()?;
        self.cursor.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Resume after the persisted file length
    ///
    /// The cursor never comes from meta records, so no appended byte can be
    /// overwritten even if the meta file lags behind.
    pub fn initialize_exists(&self) -> Result<u64> {
        let length = self.file.recover_length()?;
        self.cursor.store(length, Ordering::SeqCst);
        Ok(length)
    }

    /// Append `bytes`, returning their starting offset
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        let offset = self.cursor.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.file.put_bytes(offset, bytes)?;
        Ok(offset)
    }

    /// Read `length` bytes at `offset`
    pub fn read(&self, offset: u64, length: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(length);
        self.file.get_bytes(offset, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Fill `dest` from `offset`
    pub fn read_into(&self, dest: &mut [u8], offset: u64) -> Result<()> {
        self.file.get_bytes(offset, dest)
    }

    /// Next offset to be handed out
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn file(&self) -> &MemoryMappedFile {
        &self.file
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.file.close()
    }
}
