//! Meta Segment
//!
//! Fixed-stride status records plus the in-memory indexes built over them.
//!
//! ## Concurrency:
//! - Status transitions are a single CAS on the record's status cell; of any
//!   number of racing `lock` calls exactly one wins. No lock is held across
//!   a transition.
//! - Pushes race only on `next_position` (atomic) and the UUID reservation
//!   in `pending`; they never collide.
//! - The persisted count only grows, under `persisted_count`.
//!
//! ## Crash Ordering
//! Payload bytes are written before the record, and the record before the
//! count covering it. A crash can leave an all-zero slot below the count
//! (a concurrent push that had not written yet); recovery skips it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::message::MessageType;
use crate::mmap::MemoryMappedFile;

use super::record::{record_offset, MetaRecord, Status, RECORD_SIZE, STATUS_FIELD_OFFSET};

// =============================================================================
// Message Meta
// =============================================================================

/// In-memory view of one record; only the status ever changes
pub struct MessageMeta {
    uuid: Uuid,
    offset: u64,
    length: u32,
    kind: MessageType,
    position: u32,
    status: AtomicI32,

    /// Orders status writes to the file so the last one reflects the cell
    persist_lock: Mutex<()>,
}

impl MessageMeta {
    fn new(uuid: Uuid, offset: u64, length: u32, kind: MessageType, position: u32, status: Status) -> Self {
        Self {
            uuid,
            offset,
            length,
            kind,
            position,
            status: AtomicI32::new(status.tag()),
            persist_lock: Mutex::new(()),
        }
    }

    fn from_record(record: &MetaRecord, position: u32, status: Status) -> Result<Self> {
        if record.offset < 0 || record.length < 0 {
            return Err(QueueError::Corruption(format!(
                "record {} has negative offset {} or length {}",
                position, record.offset, record.length
            )));
        }
        Ok(Self::new(
            record.uuid(),
            record.offset as u64,
            record.length as u32,
            MessageType::from_tag(record.kind)?,
            position,
            status,
        ))
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Byte offset of the payload in the data segment
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Creation order, also the record slot in the meta file
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn status(&self) -> Status {
        // The cell only ever holds tags written through `Status::tag`
        Status::from_tag(self.status.load(Ordering::Acquire)).unwrap_or(Status::None)
    }

    pub fn is_status(&self, expected: Status) -> bool {
        self.status.load(Ordering::Acquire) == expected.tag()
    }

    /// Atomically move `expected → new`; false if the status was anything else
    pub fn compare_and_set_status(&self, expected: Status, new: Status) -> bool {
        self.status
            .compare_exchange(expected.tag(), new.tag(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn to_record(&self) -> MetaRecord {
        MetaRecord::new(self.uuid, self.offset, self.length, self.status(), self.kind.tag())
    }
}

impl fmt::Debug for MessageMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageMeta")
            .field("uuid", &self.uuid)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Write Reservation
// =============================================================================

/// Exclusive claim on a UUID for the duration of one push
///
/// Obtained from `MetaSegment::write_lock`; dropping it without pushing
/// frees the UUID again.
pub struct WriteReservation<'a> {
    segment: &'a MetaSegment,
    uuid: Uuid,
}

impl WriteReservation<'_> {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Drop for WriteReservation<'_> {
    fn drop(&mut self) {
        self.segment.pending.remove(&self.uuid);
    }
}

// =============================================================================
// Recovery Stats
// =============================================================================

/// Outcome of rebuilding the indexes from disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Persisted record count
    pub records: u32,

    /// Records recovered as New
    pub live: u32,

    /// Records recovered as Locked
    pub locked: u32,

    /// Tombstones
    pub deleted: u32,

    /// Never-written slots below the count
    pub empty: u32,

    /// Later live records whose UUID was already recovered; left unindexed
    pub duplicates: u32,
}

// =============================================================================
// Meta Segment
// =============================================================================

/// Status records for every message ever pushed
pub struct MetaSegment {
    file: MemoryMappedFile,

    /// Next position to hand out
    next_position: AtomicU32,

    /// Highest count written to the file
    persisted_count: Mutex<u32>,

    /// Live (New or Locked) messages by UUID
    live: DashMap<Uuid, Arc<MessageMeta>>,

    /// UUIDs with a push in flight
    pending: DashSet<Uuid>,

    /// Live messages in creation order, scanned by `lock_and_pop`
    ordered: RwLock<BTreeMap<u32, Arc<MessageMeta>>>,
}

impl MetaSegment {
    pub fn new(file: MemoryMappedFile) -> Self {
        Self {
            file,
            next_position: AtomicU32::new(0),
            persisted_count: Mutex::new(0),
            live: DashMap::new(),
            pending: DashSet::new(),
            ordered: RwLock::new(BTreeMap::new()),
        }
    }

    // =========================================================================
    // Initialization / Recovery
    // =========================================================================

    /// Start from an empty file, discarding existing pages and indexes
    pub fn initialize_new(&self) -> Result<()> {
        self.live.clear();
        self.ordered.write().clear();
        self.file.reset()?;

        let mut persisted = self.persisted_count.lock();
        self.file.put_int(0, 0)?;
        *persisted = 0;
        self.next_position.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Rebuild the indexes from the records on disk
    ///
    /// Reads the persisted count, then every record below it in order.
    /// Deleted and never-written records stay out of the indexes.
    pub fn initialize_exists(&self) -> Result<RecoveryStats> {
        self.live.clear();
        self.ordered.write().clear();
        self.file.recover_length()?;

        let count = self.read_count()?;
        let mut stats = RecoveryStats {
            records: count,
            ..Default::default()
        };
        let mut ordered = BTreeMap::new();

        for position in 0..count {
            let record = self.read_record(position)?;
            if record.is_empty() {
                stats.empty += 1;
                continue;
            }

            let status = record.status()?;
            match status {
                Status::None => {
                    stats.empty += 1;
                    continue;
                }
                Status::Deleted => {
                    stats.deleted += 1;
                    continue;
                }
                Status::New | Status::Locked => {}
            }

            let meta = Arc::new(MessageMeta::from_record(&record, position, status)?);
            if self.live.contains_key(&meta.uuid) {
                tracing::warn!(
                    uuid = %meta.uuid,
                    position,
                    "Duplicate live record during recovery, keeping the earlier one"
                );
                stats.duplicates += 1;
                continue;
            }
            self.live.insert(meta.uuid, Arc::clone(&meta));
            ordered.insert(position, meta);
            if status == Status::Locked {
                stats.locked += 1;
            } else {
                stats.live += 1;
            }
        }

        *self.ordered.write() = ordered;
        *self.persisted_count.lock() = count;
        self.next_position.store(count, Ordering::SeqCst);

        Ok(stats)
    }

    fn read_count(&self) -> Result<u32> {
        if self.file.length() == 0 {
            return Ok(0);
        }
        let count = self.file.get_int(0)?;
        if count < 0 {
            return Err(QueueError::Corruption(format!(
                "negative meta record count {}",
                count
            )));
        }
        let needed = record_offset(count as u32);
        if needed > self.file.length() {
            return Err(QueueError::Corruption(format!(
                "meta record count {} needs {} bytes, file holds {}",
                count,
                needed,
                self.file.length()
            )));
        }
        Ok(count as u32)
    }

    /// Grow the persisted count to at least `count`
    fn write_count(&self, count: u32) -> Result<()> {
        let mut persisted = self.persisted_count.lock();
        if count > *persisted {
            self.file.put_int(0, count as i32)?;
            *persisted = count;
        }
        Ok(())
    }

    // =========================================================================
    // Raw Records
    // =========================================================================

    /// Write a full record at `position`
    pub fn write_meta(&self, record: &MetaRecord, position: u32) -> Result<()> {
        let bytes = record.encode()?;
        self.file.put_bytes(record_offset(position), &bytes)
    }

    /// Read the record at `position`, or None past the persisted count
    pub fn read_meta_at(&self, position: u32) -> Result<Option<MetaRecord>> {
        if position >= self.message_count() {
            return Ok(None);
        }
        self.read_record(position).map(Some)
    }

    fn read_record(&self, position: u32) -> Result<MetaRecord> {
        let mut buf = [0u8; RECORD_SIZE as usize];
        self.file.get_bytes(record_offset(position), &mut buf)?;
        MetaRecord::decode(&buf)
    }

    /// Write the current status cell of `meta` to its record
    fn persist_status(&self, meta: &MessageMeta) -> Result<()> {
        let _persisting = meta.persist_lock.lock();
        let tag = meta.status.load(Ordering::Acquire);
        self.file
            .put_int(record_offset(meta.position) + STATUS_FIELD_OFFSET, tag)
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Reserve `uuid` for a push
    ///
    /// Returns None if the UUID is already live or being pushed.
    pub fn write_lock(&self, uuid: Uuid) -> Option<WriteReservation<'_>> {
        if !self.pending.insert(uuid) {
            return None;
        }
        let reservation = WriteReservation {
            segment: self,
            uuid,
        };
        // A finished push enters `live` before leaving `pending`
        if self.live.contains_key(&uuid) {
            return None;
        }
        Some(reservation)
    }

    /// Record a message whose payload is already in the data segment
    pub fn push(
        &self,
        reservation: WriteReservation<'_>,
        offset: u64,
        length: u32,
        kind: MessageType,
    ) -> Result<Arc<MessageMeta>> {
        let uuid = reservation.uuid();
        let position = self.next_position.fetch_add(1, Ordering::SeqCst);
        let meta = Arc::new(MessageMeta::new(uuid, offset, length, kind, position, Status::New));

        self.write_meta(&meta.to_record(), position)?;
        self.write_count(position + 1)?;

        self.live.insert(uuid, Arc::clone(&meta));
        self.ordered.write().insert(position, Arc::clone(&meta));
        drop(reservation);

        Ok(meta)
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    /// Live meta for `uuid`
    pub fn read_meta(&self, uuid: &Uuid) -> Option<Arc<MessageMeta>> {
        self.live
            .get(uuid)
            .map(|m| Arc::clone(m.value()))
            .filter(|m| m.status().is_live())
    }

    pub fn status(&self, uuid: &Uuid) -> Option<Status> {
        self.read_meta(uuid).map(|m| m.status())
    }

    /// New → Locked for one message
    pub fn lock(&self, uuid: &Uuid) -> Result<Option<Arc<MessageMeta>>> {
        self.transition(uuid, Status::New, Status::Locked)
    }

    /// Lock the oldest message still New
    pub fn lock_and_pop(&self) -> Result<Option<Arc<MessageMeta>>> {
        let popped = self
            .ordered
            .read()
            .values()
            .find(|m| m.compare_and_set_status(Status::New, Status::Locked))
            .cloned();

        match popped {
            Some(meta) => {
                self.persist_status(&meta)?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// Oldest message still New, without locking it
    pub fn peek(&self) -> Option<Arc<MessageMeta>> {
        self.ordered
            .read()
            .values()
            .find(|m| m.is_status(Status::New))
            .cloned()
    }

    /// Locked → Deleted; the record stays on disk as a tombstone
    pub fn unlock_and_delete(&self, uuid: &Uuid) -> Result<Option<Arc<MessageMeta>>> {
        let meta = match self.transition(uuid, Status::Locked, Status::Deleted)? {
            Some(meta) => meta,
            None => return Ok(None),
        };
        self.live.remove_if(uuid, |_, m| Arc::ptr_eq(m, &meta));
        self.ordered.write().remove(&meta.position);
        Ok(Some(meta))
    }

    /// Locked → New; the message can be locked again
    pub fn unlock_and_queue(&self, uuid: &Uuid) -> Result<Option<Arc<MessageMeta>>> {
        self.transition(uuid, Status::Locked, Status::New)
    }

    fn transition(&self, uuid: &Uuid, from: Status, to: Status) -> Result<Option<Arc<MessageMeta>>> {
        let meta = match self.read_meta(uuid) {
            Some(meta) => meta,
            None => return Ok(None),
        };
        if !meta.compare_and_set_status(from, to) {
            return Ok(None);
        }
        self.persist_status(&meta)?;
        Ok(Some(meta))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Live (New or Locked) messages
    pub fn size(&self) -> usize {
        self.live.len()
    }

    /// Records covered by the persisted count
    pub fn message_count(&self) -> u32 {
        *self.persisted_count.lock()
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
