//! Tests for MetaSegment
//!
//! These tests verify:
//! - UUID reservation for pushes
//! - The New → Locked → Deleted / New state machine
//! - FIFO pop order
//! - Tombstones and status writes on disk
//! - Index rebuild on recovery

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mmqueue::mmap::{MappedPageFactory, MemoryMappedFile};
use mmqueue::segment::{record_offset, MetaRecord, MetaSegment, RecoveryStats, Status};
use mmqueue::MessageType;
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

// Not a multiple of the record size, so records straddle pages
const PAGE_SIZE: usize = 64;

fn open_segment(temp_dir: &TempDir) -> MetaSegment {
    let factory =
        MappedPageFactory::new(temp_dir.path().join("meta"), PAGE_SIZE, Duration::from_secs(60))
            .unwrap();
    MetaSegment::new(MemoryMappedFile::open(Arc::new(factory)).unwrap())
}

fn setup_segment() -> (TempDir, MetaSegment) {
    let temp_dir = TempDir::new().unwrap();
    let segment = open_segment(&temp_dir);
    segment.initialize_new().unwrap();
    (temp_dir, segment)
}

/// Push a record for a fresh UUID at a fake data offset
fn push(segment: &MetaSegment, offset: u64) -> Uuid {
    let uuid = Uuid::new_v4();
    let reservation = segment.write_lock(uuid).unwrap();
    segment
        .push(reservation, offset, 10, MessageType::String)
        .unwrap();
    uuid
}

// =============================================================================
// Push Tests
// =============================================================================

#[test]
fn test_push_writes_record_and_count() {
    let (_temp, segment) = setup_segment();

    let uuid = push(&segment, 500);

    assert_eq!(segment.message_count(), 1);
    assert_eq!(segment.size(), 1);
    let record = segment.read_meta_at(0).unwrap().unwrap();
    assert_eq!(record.uuid(), uuid);
    assert_eq!(record.offset, 500);
    assert_eq!(record.length, 10);
    assert_eq!(record.status().unwrap(), Status::New);
    assert_eq!(segment.file().get_int(0).unwrap(), 1);
}

#[test]
fn test_push_assigns_positions_in_order() {
    let (_temp, segment) = setup_segment();

    let uuids: Vec<Uuid> = (0..5).map(|i| push(&segment, i * 10)).collect();

    for (position, uuid) in uuids.iter().enumerate() {
        let meta = segment.read_meta(uuid).unwrap();
        assert_eq!(meta.position(), position as u32);
        assert_eq!(meta.offset(), position as u64 * 10);
    }
    assert!(segment.read_meta_at(5).unwrap().is_none());
}

#[test]
fn test_write_lock_rejects_live_uuid() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);

    assert!(segment.write_lock(uuid).is_none());
    assert_eq!(segment.message_count(), 1);
}

#[test]
fn test_write_lock_rejects_pending_uuid() {
    let (_temp, segment) = setup_segment();
    let uuid = Uuid::new_v4();

    let first = segment.write_lock(uuid).unwrap();
    assert!(segment.write_lock(uuid).is_none());

    drop(first);
    assert!(segment.write_lock(uuid).is_some());
}

#[test]
fn test_dropped_reservation_writes_nothing() {
    let (_temp, segment) = setup_segment();

    drop(segment.write_lock(Uuid::new_v4()).unwrap());

    assert_eq!(segment.message_count(), 0);
    assert_eq!(segment.size(), 0);
}

#[test]
fn test_uuid_reusable_after_delete() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);
    segment.lock(&uuid).unwrap().unwrap();
    segment.unlock_and_delete(&uuid).unwrap().unwrap();

    let reservation = segment.write_lock(uuid).unwrap();
    let meta = segment.push(reservation, 99, 1, MessageType::Json).unwrap();

    assert_eq!(meta.position(), 1);
    assert_eq!(segment.status(&uuid), Some(Status::New));
}

// =============================================================================
// State Machine Tests
// =============================================================================

#[test]
fn test_lock_new_message() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);

    let meta = segment.lock(&uuid).unwrap().unwrap();

    assert_eq!(meta.status(), Status::Locked);
    assert_eq!(segment.status(&uuid), Some(Status::Locked));
    assert!(segment.lock(&uuid).unwrap().is_none());
}

#[test]
fn test_lock_unknown_uuid() {
    let (_temp, segment) = setup_segment();

    assert!(segment.lock(&Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn test_delete_requires_locked() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);

    assert!(segment.unlock_and_delete(&uuid).unwrap().is_none());
    assert_eq!(segment.status(&uuid), Some(Status::New));
}

#[test]
fn test_rollback_requires_locked() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);

    assert!(segment.unlock_and_queue(&uuid).unwrap().is_none());

    segment.lock(&uuid).unwrap().unwrap();
    let meta = segment.unlock_and_queue(&uuid).unwrap().unwrap();
    assert_eq!(meta.status(), Status::New);

    // Lockable again
    assert!(segment.lock(&uuid).unwrap().is_some());
}

#[test]
fn test_delete_removes_from_indexes() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);
    segment.lock(&uuid).unwrap().unwrap();

    let meta = segment.unlock_and_delete(&uuid).unwrap().unwrap();

    assert_eq!(meta.status(), Status::Deleted);
    assert!(segment.read_meta(&uuid).is_none());
    assert_eq!(segment.status(&uuid), None);
    assert_eq!(segment.size(), 0);
    assert_eq!(segment.message_count(), 1);
    assert!(segment.unlock_and_delete(&uuid).unwrap().is_none());
}

#[test]
fn test_status_changes_reach_the_file() {
    let (_temp, segment) = setup_segment();
    let uuid = push(&segment, 0);
    let status_at = |s: &MetaSegment| s.read_meta_at(0).unwrap().unwrap().status().unwrap();

    segment.lock(&uuid).unwrap();
    assert_eq!(status_at(&segment), Status::Locked);

    segment.unlock_and_queue(&uuid).unwrap();
    assert_eq!(status_at(&segment), Status::New);

    segment.lock(&uuid).unwrap();
    segment.unlock_and_delete(&uuid).unwrap();
    let tombstone = segment.read_meta_at(0).unwrap().unwrap();
    assert_eq!(tombstone.status().unwrap(), Status::Deleted);
    assert_eq!(tombstone.uuid(), uuid);
}

// =============================================================================
// Pop / Peek Tests
// =============================================================================

#[test]
fn test_lock_and_pop_is_fifo() {
    let (_temp, segment) = setup_segment();
    let uuids: Vec<Uuid> = (0..4).map(|i| push(&segment, i)).collect();

    for uuid in &uuids {
        let meta = segment.lock_and_pop().unwrap().unwrap();
        assert_eq!(meta.uuid(), *uuid);
        assert_eq!(meta.status(), Status::Locked);
    }
    assert!(segment.lock_and_pop().unwrap().is_none());
}

#[test]
fn test_pop_skips_locked_and_returns_rolled_back_in_position_order() {
    let (_temp, segment) = setup_segment();
    let a = push(&segment, 0);
    let b = push(&segment, 1);
    let c = push(&segment, 2);

    segment.lock(&a).unwrap().unwrap();
    assert_eq!(segment.lock_and_pop().unwrap().unwrap().uuid(), b);

    segment.unlock_and_queue(&a).unwrap().unwrap();
    assert_eq!(segment.lock_and_pop().unwrap().unwrap().uuid(), a);
    assert_eq!(segment.lock_and_pop().unwrap().unwrap().uuid(), c);
}

#[test]
fn test_peek_does_not_lock() {
    let (_temp, segment) = setup_segment();
    assert!(segment.peek().is_none());
    let a = push(&segment, 0);
    push(&segment, 1);

    assert_eq!(segment.peek().unwrap().uuid(), a);
    assert_eq!(segment.peek().unwrap().uuid(), a);
    assert_eq!(segment.status(&a), Some(Status::New));
}

#[test]
fn test_concurrent_lock_single_winner() {
    let (_temp, segment) = setup_segment();
    let segment = Arc::new(segment);
    let uuid = push(&segment, 0);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let segment = Arc::clone(&segment);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                segment.lock(&uuid).unwrap().is_some()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_initialize_exists_on_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    let segment = open_segment(&temp_dir);

    let stats = segment.initialize_exists().unwrap();

    assert_eq!(stats, RecoveryStats::default());
    assert_eq!(segment.message_count(), 0);
}

#[test]
fn test_recovery_rebuilds_statuses() {
    let temp_dir = TempDir::new().unwrap();
    let (new, locked, deleted) = {
        let segment = open_segment(&temp_dir);
        segment.initialize_new().unwrap();
        let new = push(&segment, 0);
        let locked = push(&segment, 10);
        let deleted = push(&segment, 20);
        segment.lock(&locked).unwrap();
        segment.lock(&deleted).unwrap();
        segment.unlock_and_delete(&deleted).unwrap();
        segment.close().unwrap();
        (new, locked, deleted)
    };

    let segment = open_segment(&temp_dir);
    let stats = segment.initialize_exists().unwrap();

    assert_eq!(
        stats,
        RecoveryStats {
            records: 3,
            live: 1,
            locked: 1,
            deleted: 1,
            empty: 0,
            duplicates: 0,
        }
    );
    assert_eq!(segment.status(&new), Some(Status::New));
    assert_eq!(segment.status(&locked), Some(Status::Locked));
    assert_eq!(segment.status(&deleted), None);
    assert_eq!(segment.size(), 2);

    // Positions continue after the recovered count
    let next = push(&segment, 30);
    assert_eq!(segment.read_meta(&next).unwrap().position(), 3);
}

#[test]
fn test_recovery_skips_unwritten_slot() {
    let temp_dir = TempDir::new().unwrap();
    let kept = {
        let segment = open_segment(&temp_dir);
        segment.initialize_new().unwrap();
        let kept = push(&segment, 0);
        // A slot covered by the count but never written
        let record = MetaRecord::new(Uuid::new_v4(), 5, 5, Status::New, 0);
        segment.write_meta(&record, 2).unwrap();
        segment.file().put_int(0, 3).unwrap();
        segment.close().unwrap();
        kept
    };

    let segment = open_segment(&temp_dir);
    let stats = segment.initialize_exists().unwrap();

    assert_eq!(stats.records, 3);
    assert_eq!(stats.live, 2);
    assert_eq!(stats.empty, 1);
    assert_eq!(segment.size(), 2);
    assert_eq!(segment.lock_and_pop().unwrap().unwrap().uuid(), kept);
}

#[test]
fn test_recovery_counts_duplicate_live_uuid_once() {
    let temp_dir = TempDir::new().unwrap();
    let (first, second) = {
        let segment = open_segment(&temp_dir);
        segment.initialize_new().unwrap();
        let first = push(&segment, 0);
        let second = push(&segment, 10);
        // Overwrite slot 1 with a second live record for `first`
        let copy = MetaRecord::new(first, 10, 10, Status::Locked, 0);
        segment.write_meta(&copy, 1).unwrap();
        segment.close().unwrap();
        (first, second)
    };

    let segment = open_segment(&temp_dir);
    let stats = segment.initialize_exists().unwrap();

    assert_eq!(stats.records, 2);
    assert_eq!(stats.live, 1);
    assert_eq!(stats.locked, 0);
    assert_eq!(stats.duplicates, 1);
    assert_eq!((stats.live + stats.locked) as usize, segment.size());
    // The earlier record wins
    assert_eq!(segment.status(&first), Some(Status::New));
    assert_eq!(segment.read_meta(&first).unwrap().position(), 0);
    assert_eq!(segment.status(&second), None);
}

#[test]
fn test_recovery_rejects_count_beyond_file() {
    let temp_dir = TempDir::new().unwrap();
    {
        let segment = open_segment(&temp_dir);
        segment.initialize_new().unwrap();
        push(&segment, 0);
        segment.file().put_int(0, 1_000).unwrap();
        segment.close().unwrap();
    }

    let segment = open_segment(&temp_dir);

    assert!(segment.initialize_exists().is_err());
}

#[test]
fn test_recovery_rejects_unknown_status() {
    let temp_dir = TempDir::new().unwrap();
    {
        let segment = open_segment(&temp_dir);
        segment.initialize_new().unwrap();
        push(&segment, 0);
        segment.file().put_int(record_offset(0) + 24, 9).unwrap();
        segment.close().unwrap();
    }

    let segment = open_segment(&temp_dir);

    assert!(segment.initialize_exists().is_err());
}
