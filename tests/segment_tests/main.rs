//! Segment tests
//!
//! - `record_tests`: meta record binary layout
//! - `append_tests`: payload log offsets and reads
//! - `meta_tests`: status state machine and recovery

mod meta_tests;
mod record_tests;
