//! Queue messages
//!
//! The unit handed to and returned from the transaction log.

use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{QueueError, Result};

/// Payload type tag, persisted as its discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// UTF-8 text payload
    String = 0,

    /// JSON document payload
    Json = 1,
}

impl MessageType {
    /// Decode the on-disk tag
    pub fn from_tag(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::String),
            1 => Ok(MessageType::Json),
            other => Err(QueueError::Corruption(format!(
                "unknown message type tag {}",
                other
            ))),
        }
    }

    pub fn tag(self) -> i32 {
        self as i32
    }
}

/// An immutable queue message: identity, type tag and opaque payload
#[derive(Clone, PartialEq, Eq)]
pub struct QueueMessage {
    uuid: Uuid,
    kind: MessageType,
    payload: Bytes,
}

impl QueueMessage {
    pub fn new(uuid: Uuid, kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            uuid,
            kind,
            payload: payload.into(),
        }
    }

    /// Create a message with a fresh random (v4) UUID
    pub fn with_random_uuid(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self::new(Uuid::new_v4(), kind, payload)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("uuid", &self.uuid)
            .field("kind", &self.kind)
            .field("len", &self.payload.len())
            .finish()
    }
}
