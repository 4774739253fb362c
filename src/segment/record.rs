//! Meta record codec
//!
//! Fixed 36-byte big-endian encoding via bincode's fixint options.

use bincode::Options;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Size of the leading record count field
pub const COUNT_FIELD_SIZE: u64 = 4;

/// Encoded size of one record: 8 + 8 + 8 + 4 + 4 + 4
pub const RECORD_SIZE: u64 = 36;

/// Position of the status field inside a record
pub(crate) const STATUS_FIELD_OFFSET: u64 = 24;

/// File offset of the record at `position`
pub fn record_offset(position: u32) -> u64 {
    COUNT_FIELD_SIZE + position as u64 * RECORD_SIZE
}

/// Message status, persisted as its discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// Never-written slot
    None = 0,
    New = 1,
    Locked = 2,
    Deleted = 3,
}

impl Status {
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(Status::None),
            1 => Ok(Status::New),
            2 => Ok(Status::Locked),
            3 => Ok(Status::Deleted),
            other => Err(QueueError::Corruption(format!("unknown status tag {}", other))),
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }

    /// New or Locked
    pub fn is_live(self) -> bool {
        matches!(self, Status::New | Status::Locked)
    }
}

/// One meta record exactly as laid out on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub uuid_high: u64,
    pub uuid_low: u64,
    pub offset: i64,
    pub status: i32,
    pub length: i32,
    pub kind: i32,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

impl MetaRecord {
    pub fn new(uuid: Uuid, offset: u64, length: u32, status: Status, kind: i32) -> Self {
        let bits = uuid.as_u128();
        Self {
            uuid_high: (bits >> 64) as u64,
            uuid_low: bits as u64,
            offset: offset as i64,
            status: status.tag(),
            length: length as i32,
            kind,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = codec().serialize(self)?;
        debug_assert_eq!(bytes.len() as u64, RECORD_SIZE);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() as u64 != RECORD_SIZE {
            return Err(QueueError::Corruption(format!(
                "meta record must be {} bytes, got {}",
                RECORD_SIZE,
                bytes.len()
            )));
        }
        Ok(codec().deserialize(bytes)?)
    }

    pub fn uuid(&self) -> Uuid {
        Uuid::from_u128(((self.uuid_high as u128) << 64) | self.uuid_low as u128)
    }

    /// A never-written slot: both UUID halves are zero
    pub fn is_empty(&self) -> bool {
        self.uuid_high == 0 && self.uuid_low == 0
    }

    pub fn status(&self) -> Result<Status> {
        Status::from_tag(self.status)
    }
}
