//! Job orchestration and artifact storage for prompt-driven project generation.
//!
//! A client submits a prompt, the [`job_runner`] hands it to a
//! [`Generator`](io::generator::Generator) in the background, and the
//! generated files land under a single project root where they can be listed,
//! edited, previewed and downloaded as a zip. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure logic (job types, transition rules, path normalization).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config, processes, the project tree).
//!
//! [`job_store`] and [`job_runner`] tie the two together.

pub mod core;
pub mod error;
pub mod io;
pub mod job_runner;
pub mod job_store;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
