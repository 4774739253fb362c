//! Tests for the meta record layout
//!
//! These tests verify:
//! - The 36-byte big-endian field order
//! - UUID split into high and low halves
//! - Status and type tags
//! - Rejection of malformed input

use mmqueue::segment::{record_offset, MetaRecord, Status, COUNT_FIELD_SIZE, RECORD_SIZE};
use mmqueue::MessageType;
use uuid::Uuid;

#[test]
fn test_record_offset() {
    assert_eq!(COUNT_FIELD_SIZE, 4);
    assert_eq!(RECORD_SIZE, 36);
    assert_eq!(record_offset(0), 4);
    assert_eq!(record_offset(1), 40);
    assert_eq!(record_offset(10), 364);
}

#[test]
fn test_encoded_layout() {
    let uuid = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
    let record = MetaRecord::new(uuid, 0x0102, 7, Status::Locked, MessageType::Json.tag());

    let bytes = record.encode().unwrap();

    assert_eq!(bytes.len(), 36);
    assert_eq!(&bytes[0..8], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    assert_eq!(&bytes[8..16], &[0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
    // status, length, type
    assert_eq!(&bytes[24..28], &[0, 0, 0, 2]);
    assert_eq!(&bytes[28..32], &[0, 0, 0, 7]);
    assert_eq!(&bytes[32..36], &[0, 0, 0, 1]);
}

#[test]
fn test_decode_restores_fields() {
    let uuid = Uuid::new_v4();
    let record = MetaRecord::new(uuid, 123_456, 99, Status::New, MessageType::String.tag());

    let decoded = MetaRecord::decode(&record.encode().unwrap()).unwrap();

    assert_eq!(decoded, record);
    assert_eq!(decoded.uuid(), uuid);
    assert_eq!(decoded.status().unwrap(), Status::New);
    assert_eq!(decoded.offset, 123_456);
    assert_eq!(decoded.length, 99);
}

#[test]
fn test_all_zero_record_is_empty() {
    let decoded = MetaRecord::decode(&[0u8; 36]).unwrap();

    assert!(decoded.is_empty());
    assert_eq!(decoded.status().unwrap(), Status::None);
    assert!(decoded.uuid().is_nil());
}

#[test]
fn test_record_with_either_half_set_is_not_empty() {
    let high_only = MetaRecord {
        uuid_high: 1,
        ..Default::default()
    };
    let low_only = MetaRecord {
        uuid_low: 1,
        ..Default::default()
    };

    assert!(!high_only.is_empty());
    assert!(!low_only.is_empty());
}

#[test]
fn test_decode_rejects_wrong_length() {
    assert!(MetaRecord::decode(&[0u8; 35]).is_err());
    assert!(MetaRecord::decode(&[0u8; 40]).is_err());
}

#[test]
fn test_status_tags() {
    assert_eq!(Status::None.tag(), 0);
    assert_eq!(Status::New.tag(), 1);
    assert_eq!(Status::Locked.tag(), 2);
    assert_eq!(Status::Deleted.tag(), 3);

    for status in [Status::None, Status::New, Status::Locked, Status::Deleted] {
        assert_eq!(Status::from_tag(status.tag()).unwrap(), status);
    }
    assert!(Status::from_tag(4).is_err());
    assert!(Status::from_tag(-1).is_err());
}

#[test]
fn test_status_liveness() {
    assert!(Status::New.is_live());
    assert!(Status::Locked.is_live());
    assert!(!Status::None.is_live());
    assert!(!Status::Deleted.is_live());
}

#[test]
fn test_unknown_status_surfaces_as_error() {
    let record = MetaRecord {
        uuid_low: 5,
        status: 42,
        ..Default::default()
    };

    assert!(record.status().is_err());
}

#[test]
fn test_message_type_tags() {
    assert_eq!(MessageType::from_tag(0).unwrap(), MessageType::String);
    assert_eq!(MessageType::from_tag(1).unwrap(), MessageType::Json);
    assert!(MessageType::from_tag(2).is_err());
}
