//! Mapped Page Factory
//!
//! Creates, caches and deletes the page files of one directory.
//!
//! ## Concurrency
//! - `acquire_page` / `release_page`: safe from any thread. A miss takes a
//!   creation lock for THAT index only, so different indices map in parallel.
//!   The lock table is a sharded concurrent map; its bookkeeping is the only
//!   shared critical section, never the mapping I/O.
//! - Maintenance (`flush`, `delete_*`, `release_cached_pages`): callers must
//!   not run these concurrently with `acquire_page` on pages they delete or
//!   release. Deleting or releasing a page another thread still uses closes
//!   it under that thread.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use memmap2::MmapOptions;
use parking_lot::Mutex;

use crate::error::{QueueError, Result};

use super::cache::PageCache;
use super::page::MappedPage;

/// Page file name prefix: "page-42.dat"
pub const PAGE_FILE_PREFIX: &str = "page-";

/// Page file name suffix
pub const PAGE_FILE_SUFFIX: &str = ".dat";

/// Attempts made to delete a page file before giving up
const DELETE_MAX_ROUNDS: u32 = 10;

/// Pause between deletion attempts
const DELETE_BACKOFF: Duration = Duration::from_millis(200);

/// Owns the page files of one directory and their mappings
pub struct MappedPageFactory {
    /// Directory holding `page-<index>.dat` files
    page_dir: PathBuf,

    /// Size of every page in bytes
    page_size: usize,

    /// How long an idle page stays mapped
    ttl: Duration,

    /// Mapped pages by index
    cache: PageCache,

    /// Per-index creation locks, present only while a mapping is being created
    creation_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl MappedPageFactory {
    /// Create a factory over `page_dir`, creating the directory if absent
    pub fn new(page_dir: impl Into<PathBuf>, page_size: usize, ttl: Duration) -> Result<Self> {
        let page_dir = page_dir.into();
        if page_size == 0 {
            return Err(QueueError::Config("page_size must be positive".to_string()));
        }
        fs::create_dir_all(&page_dir)?;

        Ok(Self {
            page_dir,
            page_size,
            ttl,
            cache: PageCache::new(),
            creation_locks: DashMap::new(),
        })
    }

    // =========================================================================
    // Hot Path
    // =========================================================================

    /// Get the page at `index`, mapping it on first use
    ///
    /// The returned page holds a reference; give it back with `release_page`.
    pub fn acquire_page(&self, index: u64) -> Result<Arc<MappedPage>> {
        if let Some(page) = self.cache.get(index) {
            tracing::trace!(page = index, "Hit mapped page in cache");
            return Ok(page);
        }

        let lock = Arc::clone(
            self.creation_locks
                .entry(index)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let result = {
            let _creating = lock.lock();
            // Another thread may have finished mapping while we waited
            match self.cache.get(index) {
                Some(page) => Ok(page),
                None => self
                    .map_page(index)
                    .map(|page| self.cache.insert(index, Arc::new(page), self.ttl)),
            }
        };

        self.creation_locks.remove(&index);
        result
    }

    /// Give back the reference taken by `acquire_page`
    pub fn release_page(&self, index: u64) {
        self.cache.release(index);
    }

    fn map_page(&self, index: u64) -> Result<MappedPage> {
        let path = self.page_path(index);
        let map_err = |source| QueueError::PageMap {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(map_err)?;

        if file.metadata().map_err(map_err)?.len() < self.page_size as u64 {
            file.set_len(self.page_size as u64).map_err(map_err)?;
        }

        // SAFETY: the page file is private to this factory's directory and
        // sized to at least `page_size` above. All access goes through
        // MappedPage, which bounds-checks every offset, and the mapping is
        // dropped (unmapped) exactly once when the page closes.
        let map = unsafe {
            MmapOptions::new()
                .len(self.page_size)
                .map_mut(&file)
                .map_err(map_err)?
        };

        tracing::trace!(page = index, "Mapped page for {} was just created and cached", path.display());

        let offset = index * self.page_size as u64;
        Ok(MappedPage::new(index, offset, path, map))
    }

    // =========================================================================
    // Maintenance (caller-serialized)
    // =========================================================================

    /// Force every cached dirty page to stable storage
    pub fn flush(&self) -> Result<()> {
        for page in self.cache.values() {
            page.flush()?;
        }
        Ok(())
    }

    /// Unmap every cached page (flushing first); files stay on disk
    pub fn release_cached_pages(&self) {
        self.cache.remove_all();
    }

    /// Evict pages whose TTL elapsed and that nobody references
    pub fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    /// Unmap and delete every page file in the directory
    pub fn delete_all_pages(&self) -> Result<()> {
        self.cache.remove_all();
        let indexes = self.existing_page_index_set()?;
        self.delete_pages(indexes);
        tracing::trace!("All page files in dir {} have been deleted", self.page_dir.display());
        Ok(())
    }

    pub fn delete_pages(&self, indexes: impl IntoIterator<Item = u64>) {
        for index in indexes {
            self.delete_page(index);
        }
    }

    /// Unmap and delete one page file, retrying transient failures
    ///
    /// Returns whether the file is gone. Exhausting the retries only logs;
    /// the orphaned file is left for manual cleanup.
    pub fn delete_page(&self, index: u64) -> bool {
        self.cache.remove(index);
        let path = self.page_path(index);

        for round in 1..=DELETE_MAX_ROUNDS {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!("Page file {} was just deleted", path.display());
                    return true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return true,
                Err(e) => {
                    tracing::warn!(
                        round,
                        error = %e,
                        "Failed to delete page file {}",
                        path.display()
                    );
                    if round < DELETE_MAX_ROUNDS {
                        thread::sleep(DELETE_BACKOFF);
                    }
                }
            }
        }

        tracing::warn!(
            "Failed to delete page file {} after {} rounds, you may delete it manually",
            path.display(),
            DELETE_MAX_ROUNDS
        );
        false
    }

    /// Delete every page file last modified before `timestamp`
    pub fn delete_pages_before(&self, timestamp: SystemTime) -> Result<()> {
        let indexes = self.page_index_set_before(timestamp)?;
        self.delete_pages(indexes);
        Ok(())
    }

    // =========================================================================
    // Directory Discovery
    // =========================================================================

    /// Indexes of all page files currently on disk
    pub fn existing_page_index_set(&self) -> Result<BTreeSet<u64>> {
        let mut indexes = BTreeSet::new();
        for entry in fs::read_dir(&self.page_dir)? {
            let entry = entry?;
            if let Some(index) = entry.file_name().to_str().and_then(parse_page_index) {
                indexes.insert(index);
            }
        }
        Ok(indexes)
    }

    /// Indexes of page files last modified before `timestamp`
    pub fn page_index_set_before(&self, timestamp: SystemTime) -> Result<BTreeSet<u64>> {
        let mut indexes = BTreeSet::new();
        for entry in fs::read_dir(&self.page_dir)? {
            let entry = entry?;
            let index = match entry.file_name().to_str().and_then(parse_page_index) {
                Some(index) => index,
                None => continue,
            };
            if entry.metadata()?.modified()? < timestamp {
                indexes.insert(index);
            }
        }
        Ok(indexes)
    }

    /// The newest page index among files older than `timestamp`
    ///
    /// Indexes may wrap past `u64::MAX` back to 0; in that case the answer is
    /// the end of the run starting at 0, not the numerically largest index.
    pub fn first_page_index_before(&self, timestamp: SystemTime) -> Result<Option<u64>> {
        let indexes = self.page_index_set_before(timestamp)?;
        let largest = match indexes.last() {
            Some(&largest) => largest,
            None => return Ok(None),
        };

        if largest != u64::MAX {
            return Ok(Some(largest));
        }

        // Wrapped: walk the contiguous run from 0
        let mut next = 0u64;
        while indexes.contains(&next) {
            next += 1;
        }
        if next == 0 {
            Ok(Some(u64::MAX))
        } else {
            Ok(Some(next - 1))
        }
    }

    /// File names of all page files
    pub fn page_file_set(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.page_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if parse_page_index(name).is_some() {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    /// Total on-disk size of all page files
    pub fn page_files_total_size(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.page_dir)? {
            let entry = entry?;
            if entry.file_name().to_str().and_then(parse_page_index).is_some() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    pub fn page_file_last_modified(&self, index: u64) -> Option<SystemTime> {
        fs::metadata(self.page_path(index))
            .and_then(|m| m.modified())
            .ok()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_dir(&self) -> &Path {
        &self.page_dir
    }

    /// Number of currently mapped pages
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Number of in-flight page creations
    pub fn lock_map_size(&self) -> usize {
        self.creation_locks.len()
    }

    /// Path of the page file for `index`
    pub fn page_path(&self, index: u64) -> PathBuf {
        self.page_dir
            .join(format!("{}{}{}", PAGE_FILE_PREFIX, index, PAGE_FILE_SUFFIX))
    }
}

/// Parse a page index from a file name
/// "page-42.dat" → Some(42)
pub fn parse_page_index(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(PAGE_FILE_PREFIX)?
        .strip_suffix(PAGE_FILE_SUFFIX)?
        .parse()
        .ok()
}
