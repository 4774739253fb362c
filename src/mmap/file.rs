//! Memory-Mapped File
//!
//! One logical, growing byte space spread over equal-size pages.
//!
//! A global offset maps to page `offset / page_size` at local position
//! `offset % page_size`. Operations crossing a page boundary are split into
//! one acquire/op/release per page touched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

use super::factory::MappedPageFactory;
use super::now_millis;
use super::page::MappedPage;

/// Byte-addressable file built from mapped pages
pub struct MemoryMappedFile {
    factory: Arc<MappedPageFactory>,
    page_size: u64,

    /// Highest offset ever written (exclusive)
    length: AtomicU64,
}

/// Releases an acquired page on every exit path
///
/// The reference goes back to the page that was leased, even if the cache
/// has since mapped a different page at the same index.
struct PageLease {
    page: Arc<MappedPage>,
}

impl Drop for PageLease {
    fn drop(&mut self) {
        self.page.release();
        self.page.update_timestamp(now_millis());
    }
}

impl MemoryMappedFile {
    /// Wrap a factory, restoring the length from the page files on disk
    pub fn open(factory: Arc<MappedPageFactory>) -> Result<Self> {
        let file = Self {
            page_size: factory.page_size() as u64,
            factory,
            length: AtomicU64::new(0),
        };
        file.recover_length()?;
        Ok(file)
    }

    /// Recompute `length()` from the highest existing page file
    ///
    /// Page files are always fully sized, so this is page-granular: every
    /// byte of every existing page counts as written.
    pub fn recover_length(&self) -> Result<u64> {
        let length = self
            .factory
            .existing_page_index_set()?
            .last()
            .map(|&index| (index + 1) * self.page_size)
            .unwrap_or(0);
        self.length.store(length, Ordering::SeqCst);
        Ok(length)
    }

    /// Delete every page and start again from an empty file
    pub fn reset(&self) -> Result<()> {
        self.factory.delete_all_pages()?;
        self.length.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn lease(&self, index: u64) -> Result<PageLease> {
        let page = self.factory.acquire_page(index)?;
        Ok(PageLease { page })
    }

    fn mark_written(&self, end: u64) {
        self.length.fetch_max(end, Ordering::SeqCst);
    }

    /// Whether `[offset, offset + width)` lies within a single page
    fn within_page(&self, offset: u64, width: u64) -> bool {
        offset % self.page_size + width <= self.page_size
    }

    // =========================================================================
    // Bytes
    // =========================================================================

    pub fn put_bytes(&self, offset: u64, src: &[u8]) -> Result<()> {
        let mut pos = offset;
        let mut remaining = src;
        while !remaining.is_empty() {
            let local = pos % self.page_size;
            let n = ((self.page_size - local) as usize).min(remaining.len());
            let lease = self.lease(pos / self.page_size)?;
            lease.page.put_bytes(pos, &remaining[..n]);
            pos += n as u64;
            remaining = &remaining[n..];
        }
        self.mark_written(offset + src.len() as u64);
        Ok(())
    }

    pub fn get_bytes(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let mut pos = offset;
        let mut filled = 0;
        while filled < dst.len() {
            let local = pos % self.page_size;
            let n = ((self.page_size - local) as usize).min(dst.len() - filled);
            let lease = self.lease(pos / self.page_size)?;
            lease.page.get_bytes(pos, &mut dst[filled..filled + n]);
            pos += n as u64;
            filled += n;
        }
        Ok(())
    }

    // =========================================================================
    // Scalars (big-endian)
    // =========================================================================

    pub fn put_long(&self, offset: u64, value: i64) -> Result<()> {
        if !self.within_page(offset, 8) {
            return self.put_bytes(offset, &value.to_be_bytes());
        }
        let lease = self.lease(offset / self.page_size)?;
        lease.page.put_long(offset, value);
        self.mark_written(offset + 8);
        Ok(())
    }

    pub fn get_long(&self, offset: u64) -> Result<i64> {
        if !self.within_page(offset, 8) {
            let mut buf = [0u8; 8];
            self.get_bytes(offset, &mut buf)?;
            return Ok(i64::from_be_bytes(buf));
        }
        let lease = self.lease(offset / self.page_size)?;
        Ok(lease.page.get_long(offset))
    }

    pub fn put_int(&self, offset: u64, value: i32) -> Result<()> {
        if !self.within_page(offset, 4) {
            return self.put_bytes(offset, &value.to_be_bytes());
        }
        let lease = self.lease(offset / self.page_size)?;
        lease.page.put_int(offset, value);
        self.mark_written(offset + 4);
        Ok(())
    }

    pub fn get_int(&self, offset: u64) -> Result<i32> {
        if !self.within_page(offset, 4) {
            let mut buf = [0u8; 4];
            self.get_bytes(offset, &mut buf)?;
            return Ok(i32::from_be_bytes(buf));
        }
        let lease = self.lease(offset / self.page_size)?;
        Ok(lease.page.get_int(offset))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Highest offset ever written (exclusive)
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn factory(&self) -> &Arc<MappedPageFactory> {
        &self.factory
    }

    pub fn flush(&self) -> Result<()> {
        self.factory.flush()
    }

    /// Flush and unmap all cached pages
    pub fn close(&self) -> Result<()> {
        self.factory.flush()?;
        self.factory.release_cached_pages();
        Ok(())
    }
}
