//! Side-effecting adapters: configuration, processes and the project tree.

pub mod archive;
pub mod artifact_store;
pub mod config;
pub mod generator;
pub mod preview;
pub mod process;
