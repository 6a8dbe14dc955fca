//! Shared deterministic types for job bookkeeping.
//!
//! These types define the contract between the job store, the runner and the
//! HTTP surface. They carry no I/O and serialize to the JSON shapes clients see.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque job identifier (UUID v4 rendered as a string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job: `Submitted -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Trimmed prompt text handed to the generator.
    pub prompt: String,
    /// Step budget handed to the generator.
    pub recursion_limit: u32,
    pub status: JobStatus,
    /// Human-readable progress line.
    pub message: String,
    /// Generator output, present only once `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message, present only once `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly accepted job in `Submitted` state.
    pub fn submitted(id: JobId, prompt: &str, recursion_limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            prompt: prompt.to_string(),
            recursion_limit,
            status: JobStatus::Submitted,
            message: "Project generation queued".to_string(),
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply an already-validated transition.
    pub fn apply(&mut self, transition: JobTransition, now: DateTime<Utc>) {
        match transition {
            JobTransition::Running { message } => {
                if self.status == JobStatus::Submitted {
                    self.started_at = Some(now);
                }
                self.status = JobStatus::Running;
                self.message = message;
            }
            JobTransition::Completed { message, result } => {
                self.status = JobStatus::Completed;
                self.message = message;
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            JobTransition::Failed { message, error } => {
                self.status = JobStatus::Failed;
                self.message = message;
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
    }
}

/// A requested status change, carrying the payload its target status requires.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    /// Enter (or stay in) `Running` with a new progress message.
    Running { message: String },
    Completed { message: String, result: Value },
    Failed { message: String, error: String },
}

impl JobTransition {
    pub fn status(&self) -> JobStatus {
        match self {
            JobTransition::Running { .. } => JobStatus::Running,
            JobTransition::Completed { .. } => JobStatus::Completed,
            JobTransition::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobTransition::Running { message }
            | JobTransition::Completed { message, .. }
            | JobTransition::Failed { message, .. } => message,
        }
    }
}

/// Broadcast after every accepted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submitted_job_serializes_without_optional_fields() {
        let now = Utc::now();
        let job = Job::submitted(JobId::from("job-1"), "Build a todo app", 100, now);
        let value = serde_json::to_value(&job).expect("serialize");

        assert_eq!(value["id"], "job-1");
        assert_eq!(value["status"], "Submitted");
        assert_eq!(value["recursionLimit"], 100);
        assert!(value.get("result").is_none());
        assert!(value.get("error").is_none());
        assert!(value.get("completedAt").is_none());
    }

    #[test]
    fn apply_sets_timestamps_once() {
        let t0 = Utc::now();
        let mut job = Job::submitted(JobId::new(), "p", 10, t0);

        let t1 = t0 + chrono::Duration::seconds(1);
        job.apply(
            JobTransition::Running {
                message: "first".to_string(),
            },
            t1,
        );
        let t2 = t1 + chrono::Duration::seconds(1);
        job.apply(
            JobTransition::Running {
                message: "second".to_string(),
            },
            t2,
        );
        assert_eq!(job.started_at, Some(t1));
        assert_eq!(job.message, "second");

        let t3 = t2 + chrono::Duration::seconds(1);
        job.apply(
            JobTransition::Completed {
                message: "done".to_string(),
                result: json!({"files": 2}),
            },
            t3,
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(t3));
        assert_eq!(job.result, Some(json!({"files": 2})));
        assert!(job.error.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
