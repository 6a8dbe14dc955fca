//! Deterministic, pure logic shared by the builder.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod path;
pub mod size;
pub mod transition;
pub mod types;
