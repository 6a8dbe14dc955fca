//! Error types for the artifact store and the job lifecycle.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::path::PathRejection;
use crate::core::types::{JobId, JobStatus};

/// Failures of artifact store, archive and preview operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("no generated project found")]
    EmptyProject,

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("render listing: {0}")]
    Render(#[from] minijinja::Error),
}

impl StoreError {
    pub(crate) fn invalid(path: &str, rejection: PathRejection) -> Self {
        StoreError::InvalidPath {
            path: path.to_string(),
            reason: rejection.reason(),
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Failures of job submission and job store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("prompt is required")]
    EmptyPrompt,

    #[error("recursion limit must be between 1 and {max}, got {requested}")]
    InvalidRecursionLimit { requested: u32, max: u32 },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} is already {status} and cannot change")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job queue is full ({capacity} pending jobs), try again later")]
    Busy { capacity: usize },
}
