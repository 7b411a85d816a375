//! Deterministic, pure logic for the action pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod format;
pub mod notebook;
pub mod report;
pub mod response;
pub mod retry;
pub mod sequence;
