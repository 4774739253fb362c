//! Segment Module
//!
//! The two files that make up a queue's durable state.
//!
//! ## Responsibilities
//! - `AppendSegment`: write-once log of message payloads
//! - `MetaSegment`: fixed-stride status records and the message state machine
//!
//! ## Meta File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Record Count: i32 (4)                                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Record 0 (36 bytes)                                          │
//! │ ┌──────────┬──────────┬──────────┬────────┬────────┬───────┐ │
//! │ │UUID hi(8)│UUID lo(8)│Offset (8)│Status 4│Length 4│Type 4 │ │
//! │ └──────────┴──────────┴──────────┴────────┴────────┴───────┘ │
//! │ Record 1 ...                                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data File Format
//! Raw payload bytes in append order, no delimiters. A payload is located
//! only through its meta record's offset and length.
//!
//! ## Status Transitions
//! ```text
//!   None ──push──► New ──lock──► Locked ──unlock_and_delete──► Deleted
//!                   ▲               │
//!                   └───rollback────┘
//! ```

mod append;
mod meta;
mod record;

pub use append::AppendSegment;
pub use meta::{MessageMeta, MetaSegment, RecoveryStats, WriteReservation};
pub use record::{record_offset, MetaRecord, Status, COUNT_FIELD_SIZE, RECORD_SIZE};
