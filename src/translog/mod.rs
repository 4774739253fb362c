//! Transaction Log Module
//!
//! Binds one append segment and one meta segment into a queue's durable
//! storage.
//!
//! ## Responsibilities
//! - Push: payload into the data segment, then the record, then the count
//! - Lock / pop / delete / rollback through the meta state machine
//! - Recovery of both segments on startup
//! - Checkpointing per the configured `SyncStrategy`

mod checkpoint;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::{Config, SyncStrategy};
use crate::error::{QueueError, Result};
use crate::message::QueueMessage;
use crate::mmap::{MappedPageFactory, MemoryMappedFile};
use crate::segment::{AppendSegment, MessageMeta, MetaRecord, MetaSegment, RecoveryStats, Status};

use checkpoint::Checkpointer;

/// On-disk footprint of one transaction log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub meta_pages: usize,
    pub data_pages: usize,
    pub meta_bytes: u64,
    pub data_bytes: u64,

    /// Next data offset to be handed out
    pub data_cursor: u64,
}

/// Durable storage for one queue
///
/// ## Concurrency Model
/// All operations take `&self` and may run from any number of threads.
/// Queue semantics are coordinated only by the status CAS in the meta
/// segment; there is no log-wide write lock.
///
/// ## Lifecycle
/// `open` → `initialize_new` | `initialize_exists` → operations → `close`.
/// `load` does the first two steps, recovering when files already exist.
pub struct TransactionLog {
    config: Config,
    data: AppendSegment,
    meta: MetaSegment,

    /// Mutations since the last `EveryNOperations` checkpoint
    ops_since_sync: AtomicUsize,

    closed: AtomicBool,
    checkpointer: Mutex<Option<Checkpointer>>,
}

impl TransactionLog {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const META_DIR: &'static str = "meta";
    const DATA_DIR: &'static str = "data";

    /// Open the page directories without touching their contents
    ///
    /// Call `initialize_new` or `initialize_exists` before use.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let ttl = config.cache_ttl();
        let meta_factory = Arc::new(MappedPageFactory::new(
            config.data_dir.join(Self::META_DIR),
            config.page_size,
            ttl,
        )?);
        let data_factory = Arc::new(MappedPageFactory::new(
            config.data_dir.join(Self::DATA_DIR),
            config.page_size,
            ttl,
        )?);

        let checkpointer = match config.sync_strategy {
            SyncStrategy::Interval { ms } => Some(Checkpointer::spawn(
                Duration::from_millis(ms),
                vec![Arc::clone(&meta_factory), Arc::clone(&data_factory)],
            )?),
            _ => None,
        };

        Ok(Self {
            meta: MetaSegment::new(MemoryMappedFile::open(meta_factory)?),
            data: AppendSegment::new(MemoryMappedFile::open(data_factory)?),
            config,
            ops_since_sync: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            checkpointer: Mutex::new(checkpointer),
        })
    }

    /// Open and initialize: recover existing files, or start fresh
    pub fn load(config: Config) -> Result<Self> {
        let log = Self::open(config)?;
        if log.meta.file().factory().existing_page_index_set()?.is_empty() {
            log.initialize_new()?;
        } else {
            let stats = log.initialize_exists()?;
            tracing::debug!(?stats, "Loaded existing transaction log");
        }
        Ok(log)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn load_path(path: &Path) -> Result<Self> {
        Self::load(Config::builder().data_dir(path).build())
    }

    /// Discard any existing files and start an empty log
    pub fn initialize_new(&self) -> Result<()> {
        self.ensure_open()?;
        self.meta.initialize_new()?;
        self.data.initialize_new()?;
        self.ops_since_sync.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Rebuild state from existing files
    ///
    /// The data cursor comes from the data file's own length, never from
    /// the meta records.
    pub fn initialize_exists(&self) -> Result<RecoveryStats> {
        self.ensure_open()?;
        let stats = self.meta.initialize_exists()?;
        let cursor = self.data.initialize_exists()?;

        tracing::info!(
            records = stats.records,
            live = stats.live,
            locked = stats.locked,
            deleted = stats.deleted,
            empty = stats.empty,
            duplicates = stats.duplicates,
            data_cursor = cursor,
            "Transaction log recovered from {}",
            self.config.data_dir.display()
        );
        Ok(stats)
    }

    // =========================================================================
    // Queue Operations
    // =========================================================================

    /// Store a new message
    ///
    /// Returns `Ok(false)` without touching any file if the UUID is live.
    pub fn push(&self, message: &QueueMessage) -> Result<bool> {
        self.ensure_open()?;

        let uuid = message.uuid();
        if uuid.is_nil() {
            return Err(QueueError::InvalidMessage(
                "nil UUID is reserved for empty slots".to_string(),
            ));
        }
        let length = u32::try_from(message.len())
            .ok()
            .filter(|&len| len <= i32::MAX as u32)
            .ok_or_else(|| {
                QueueError::InvalidMessage(format!("payload of {} bytes is too large", message.len()))
            })?;

        let reservation = match self.meta.write_lock(uuid) {
            Some(reservation) => reservation,
            None => {
                tracing::debug!(%uuid, "Rejected duplicate push");
                return Ok(false);
            }
        };

        let offset = self.data.append(message.payload())?;
        self.meta.push(reservation, offset, length, message.kind())?;

        self.after_mutation()?;
        Ok(true)
    }

    /// Read a live message without changing its status
    pub fn get(&self, uuid: &Uuid) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        self.meta
            .read_meta(uuid)
            .map(|meta| self.read_message(&meta))
            .transpose()
    }

    /// Lock one message (New → Locked)
    pub fn lock(&self, uuid: &Uuid) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        let meta = self.meta.lock(uuid)?;
        self.finish_transition(meta)
    }

    /// Lock the oldest available message
    pub fn lock_and_pop(&self) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        let meta = self.meta.lock_and_pop()?;
        self.finish_transition(meta)
    }

    /// Oldest available message, left unlocked
    pub fn peek(&self) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        self.meta
            .peek()
            .map(|meta| self.read_message(&meta))
            .transpose()
    }

    /// Finish a locked message (Locked → Deleted)
    pub fn unlock_and_delete(&self, uuid: &Uuid) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        let meta = self.meta.unlock_and_delete(uuid)?;
        self.finish_transition(meta)
    }

    /// Return a locked message to the queue (Locked → New)
    pub fn unlock_and_rollback(&self, uuid: &Uuid) -> Result<Option<QueueMessage>> {
        self.ensure_open()?;
        let meta = self.meta.unlock_and_queue(uuid)?;
        self.finish_transition(meta)
    }

    fn finish_transition(&self, meta: Option<Arc<MessageMeta>>) -> Result<Option<QueueMessage>> {
        match meta {
            Some(meta) => {
                self.after_mutation()?;
                self.read_message(&meta).map(Some)
            }
            None => Ok(None),
        }
    }

    fn read_message(&self, meta: &MessageMeta) -> Result<QueueMessage> {
        let payload = self.data.read(meta.offset(), meta.length() as usize)?;
        Ok(QueueMessage::new(meta.uuid(), meta.kind(), payload))
    }

    // =========================================================================
    // Durability
    // =========================================================================

    fn after_mutation(&self) -> Result<()> {
        match self.config.sync_strategy {
            SyncStrategy::EveryWrite => self.flush_segments(),
            SyncStrategy::EveryNOperations { count } => {
                if self.ops_since_sync.fetch_add(1, Ordering::SeqCst) + 1 >= count {
                    self.ops_since_sync.store(0, Ordering::SeqCst);
                    self.flush_segments()?;
                }
                Ok(())
            }
            SyncStrategy::Manual | SyncStrategy::Interval { .. } => Ok(()),
        }
    }

    /// Force both segments to stable storage
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_segments()
    }

    fn flush_segments(&self) -> Result<()> {
        self.data.flush()?;
        self.meta.flush()
    }

    /// Flush and unmap everything; later calls fail with `Closed`
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut checkpointer) = self.checkpointer.lock().take() {
            checkpointer.stop();
        }
        self.data.close()?;
        self.meta.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    // =========================================================================
    // Accessors (for tooling and tests)
    // =========================================================================

    /// Live (New or Locked) messages
    pub fn size(&self) -> usize {
        self.meta.size()
    }

    /// Records ever written, tombstones included
    pub fn message_count(&self) -> u32 {
        self.meta.message_count()
    }

    pub fn status(&self, uuid: &Uuid) -> Option<Status> {
        self.meta.status(uuid)
    }

    /// Every record below the persisted count, in position order
    pub fn meta_records(&self) -> Result<Vec<MetaRecord>> {
        self.ensure_open()?;
        let mut records = Vec::with_capacity(self.message_count() as usize);
        for position in 0..self.message_count() {
            if let Some(record) = self.meta.read_meta_at(position)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn storage_stats(&self) -> Result<StorageStats> {
        let meta = self.meta.file().factory();
        let data = self.data.file().factory();
        Ok(StorageStats {
            meta_pages: meta.existing_page_index_set()?.len(),
            data_pages: data.existing_page_index_set()?.len(),
            meta_bytes: meta.page_files_total_size()?,
            data_bytes: data.page_files_total_size()?,
            data_cursor: self.data.cursor(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

impl Drop for TransactionLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "Failed to close transaction log");
        }
    }
}
