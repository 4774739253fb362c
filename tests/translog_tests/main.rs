//! Transaction log tests
//!
//! - `translog_tests`: queue operations and lifecycle
//! - `recovery_tests`: close/reopen behaviour
//! - `concurrency_tests`: racing pushes, locks and pops
