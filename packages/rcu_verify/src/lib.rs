#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Independent correctness oracle for the benchmark harness: cross-checks the logs an
//! instrumented benchmark run leaves behind.
//!
//! Each instrumented variant writes two logs: the writer log records every `(version, value)`
//! pair published to the shared state, the reader log records every pair a reader observed.
//! [`verify`] judges each observation against the publication history; a version nobody
//! published or a value differing from the published one is a consistency violation in the
//! synchronization strategy under test.
//!
//! Violations are findings, not tool failures. The oracle reports them and exits cleanly;
//! only an unreadable or malformed log is an [`Error`].

mod error;
mod log;
mod verify;

pub use error::{Error, Result};
pub use log::{LogEntry, parse_log, read_log};
pub use verify::{Outcome, verify, write_report};
