//! Job lifecycle transition rules.
//!
//! Allowed moves:
//! - `Submitted -> Running`
//! - `Running -> Running` (progress message update only)
//! - `Running -> Completed | Failed`
//!
//! Anything out of a terminal status is rejected, as is skipping `Running`.

use crate::core::types::JobStatus;

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    /// The job already reached a terminal status.
    Terminal { status: JobStatus },
    /// The move skips or reverses a lifecycle step.
    OutOfOrder { from: JobStatus, to: JobStatus },
}

/// Check a status move against the lifecycle.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), TransitionRejection> {
    if from.is_terminal() {
        return Err(TransitionRejection::Terminal { status: from });
    }
    match (from, to) {
        (JobStatus::Submitted, JobStatus::Running)
        | (JobStatus::Running, JobStatus::Running)
        | (JobStatus::Running, JobStatus::Completed)
        | (JobStatus::Running, JobStatus::Failed) => Ok(()),
        _ => Err(TransitionRejection::OutOfOrder { from, to }),
    }
}
