//! Deterministic, pure logic shared by check resolution and external execution.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and return deterministic outputs suitable for tests.

pub mod env;
pub mod protocol;
pub mod staleness;
pub mod status;
pub mod types;
