//! Memory-Mapped Page Module
//!
//! Fixed-size page mappings and the logical files built from them.
//!
//! ## Responsibilities
//! - Map `page-<index>.dat` files lazily on first access
//! - Cache mapped pages with a time-to-live, never unmapping a referenced page
//! - Serialize page creation per index, never globally
//! - Present a sequence of pages as one byte-addressable file
//!
//! ## Directory Layout
//! ```text
//! {page_dir}/
//!   ├── page-0.dat      (bytes [0, page_size))
//!   ├── page-1.dat      (bytes [page_size, 2 * page_size))
//!   └── ...
//! ```
//!
//! ## Page Lifecycle
//! ```text
//!   acquire_page(i) ──► cache hit? ──yes──► acquire() ok ──► use ──► release_page(i)
//!          │                                                          │
//!          no                                                         ▼
//!          ▼                                                  timestamp refreshed
//!   per-index creation lock                                           │
//!          │                                           TTL elapsed + count == 0
//!   double-check cache ──► map file ──► insert                        │
//!                                                                     ▼
//!                                                    garbage() ──► evicted, unmapped
//! ```

mod cache;
mod factory;
mod file;
mod page;

use std::time::{SystemTime, UNIX_EPOCH};

pub use factory::{parse_page_index, MappedPageFactory, PAGE_FILE_PREFIX, PAGE_FILE_SUFFIX};
pub use file::MemoryMappedFile;
pub use page::{MappedPage, RefState};

/// Wall-clock milliseconds, used as the page recency stamp
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
