//! Process-lifetime registry of generation jobs.
//!
//! The [`JobStore`] trait is the seam handlers and the runner depend on; the
//! default [`InMemoryJobStore`] keeps records in a concurrent map. Each
//! transition runs under the entry's write lock, so check-and-apply is atomic
//! per job id and the first terminal write wins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::core::transition::{TransitionRejection, validate_transition};
use crate::core::types::{Job, JobId, JobTransition};
use crate::error::JobError;

/// Registry of job records.
pub trait JobStore: Send + Sync {
    /// Insert a new `Submitted` job and return its id.
    fn create(&self, prompt: &str, recursion_limit: u32) -> JobId;

    /// Apply a transition atomically, returning the updated record.
    fn transition(&self, id: &JobId, transition: JobTransition) -> Result<Job, JobError>;

    /// Snapshot of a job record.
    fn get(&self, id: &JobId) -> Result<Job, JobError>;

    /// Evict terminal jobs that completed before `cutoff`. Returns how many were removed.
    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize;
}

/// [`JobStore`] backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, prompt: &str, recursion_limit: u32) -> JobId {
        let id = JobId::new();
        let job = Job::submitted(id.clone(), prompt, recursion_limit, Utc::now());
        self.jobs.insert(id.clone(), job);
        debug!(job_id = %id, "job created");
        id
    }

    fn transition(&self, id: &JobId, transition: JobTransition) -> Result<Job, JobError> {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.clone()))?;
        let to = transition.status();
        validate_transition(entry.status, to).map_err(|rejection| match rejection {
            TransitionRejection::Terminal { status } => JobError::AlreadyTerminal {
                id: id.clone(),
                status,
            },
            TransitionRejection::OutOfOrder { from, to } => JobError::InvalidTransition {
                id: id.clone(),
                from,
                to,
            },
        })?;
        entry.apply(transition, Utc::now());
        debug!(job_id = %id, status = %entry.status, "job transitioned");
        Ok(entry.clone())
    }

    fn get(&self, id: &JobId) -> Result<Job, JobError> {
        self.jobs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JobError::NotFound(id.clone()))
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < cutoff))
        });
        before.saturating_sub(self.jobs.len())
    }
}
