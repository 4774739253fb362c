//! # mmqueue
//!
//! A persistent, transactional message-queue storage engine with:
//! - Memory-mapped page files cached with a time-to-live
//! - Lock-free page reference counting and eviction
//! - An append-only payload segment and a fixed-stride meta segment
//! - CAS-driven lock / delete / rollback message states
//! - Crash recovery by re-indexing the meta records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TransactionLog                          │
//! │     push / get / lock / lock_and_pop / delete / rollback    │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!      ┌───────────────────┐           ┌───────────────────┐
//!      │   AppendSegment   │           │    MetaSegment    │
//!      │    (payloads)     │           │   (status CAS)    │
//!      └─────────┬─────────┘           └─────────┬─────────┘
//!                ▼                               ▼
//!      ┌───────────────────┐           ┌───────────────────┐
//!      │ MemoryMappedFile  │           │ MemoryMappedFile  │
//!      └─────────┬─────────┘           └─────────┬─────────┘
//!                ▼                               ▼
//!      ┌───────────────────┐           ┌───────────────────┐
//!      │ MappedPageFactory │           │ MappedPageFactory │
//!      │  data/page-N.dat  │           │  meta/page-N.dat  │
//!      └───────────────────┘           └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod message;

pub mod mmap;
pub mod segment;
pub mod translog;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{QueueError, Result};
pub use config::{Config, SyncStrategy};
pub use message::{MessageType, QueueMessage};
pub use segment::{RecoveryStats, Status};
pub use translog::{StorageStats, TransactionLog};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mmqueue
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
