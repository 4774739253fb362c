//! Page Cache
//!
//! TTL cache of mapped pages keyed by page index.
//!
//! Every page handed out by `get`/`insert` carries one reference that the
//! caller gives back with `release`. A page is evicted only when its TTL has
//! elapsed since last use, it is not pinned, and `garbage()` wins (count 0).
//! `get` takes its reference under the read lock and eviction runs under the
//! write lock, so a page can never be collected between lookup and acquire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::now_millis;
use super::page::MappedPage;

struct CacheEntry {
    page: Arc<MappedPage>,
    ttl_ms: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        let stamp = self.page.timestamp();
        stamp >= 0 && now - stamp >= self.ttl_ms
    }
}

pub(crate) struct PageCache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a page and take a reference on it
    pub fn get(&self, index: u64) -> Option<Arc<MappedPage>> {
        let entries = self.entries.read();
        let entry = entries.get(&index)?;
        if entry.page.acquire() {
            entry.page.update_timestamp(now_millis());
            Some(Arc::clone(&entry.page))
        } else {
            None
        }
    }

    /// Insert a freshly mapped page and take a reference on the winner
    ///
    /// If a live page for `index` is already cached it is returned instead and
    /// `page` is dropped (unmapped) without ever being used.
    pub fn insert(&self, index: u64, page: Arc<MappedPage>, ttl: Duration) -> Arc<MappedPage> {
        let ttl_ms = ttl.as_millis() as i64;
        let winner = {
            let mut entries = self.entries.write();
            match entries.get(&index) {
                Some(existing) if existing.page.acquire() => Arc::clone(&existing.page),
                _ => {
                    page.acquire();
                    entries.insert(
                        index,
                        CacheEntry {
                            page: Arc::clone(&page),
                            ttl_ms,
                        },
                    );
                    page
                }
            }
        };
        self.evict_expired();
        winner
    }

    /// Give back a reference taken by `get`/`insert`
    pub fn release(&self, index: u64) {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(&index) {
            entry.page.release();
            entry.page.update_timestamp(now_millis());
        }
    }

    /// Drop one page from the cache and unmap it, referenced or not
    pub fn remove(&self, index: u64) {
        let removed = self.entries.write().remove(&index);
        if let Some(entry) = removed {
            close_page(&entry.page);
        }
    }

    /// Drop and unmap every cached page
    pub fn remove_all(&self) {
        let drained: Vec<CacheEntry> = self.entries.write().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            close_page(&entry.page);
        }
    }

    /// Evict expired, unreferenced, unpinned pages; returns how many went
    pub fn evict_expired(&self) -> usize {
        let now = now_millis();
        let evicted: Vec<CacheEntry> = {
            let mut entries = self.entries.write();
            let expired: Vec<u64> = entries
                .iter()
                .filter(|(_, e)| e.is_expired(now) && e.page.garbage())
                .map(|(index, _)| *index)
                .collect();
            expired
                .into_iter()
                .filter_map(|index| entries.remove(&index))
                .collect()
        };

        for entry in &evicted {
            tracing::trace!(page = entry.page.index(), "Evicting expired page");
            close_page(&entry.page);
        }
        evicted.len()
    }

    /// Snapshot of the cached pages
    pub fn values(&self) -> Vec<Arc<MappedPage>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.page))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

fn close_page(page: &MappedPage) {
    if let Err(e) = page.close() {
        tracing::warn!(page = page.index(), error = %e, "Failed to close evicted page");
    }
}
