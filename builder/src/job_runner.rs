//! Asynchronous execution of generation jobs.
//!
//! [`JobRunner::submit`] validates a request, reserves a pending slot and
//! spawns one task per job. The task waits for a worker permit, moves the job
//! to `Running`, optionally resets the project root, runs the generator on the
//! blocking pool and records the outcome. Every failure inside the task ends
//! as a `Failed` job; nothing propagates out of it.

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::types::{JobEvent, JobId, JobTransition};
use crate::error::JobError;
use crate::io::artifact_store::ArtifactStore;
use crate::io::config::JobsConfig;
use crate::io::generator::{
    ErasedGenerator, FailureKind, GenerateRequest, GenerationFailure, Generator,
};
use crate::job_store::JobStore;

pub const MSG_PROCESSING: &str = "Processing your request...";
pub const MSG_GENERATING: &str = "Generating project files...";
pub const MSG_COMPLETED: &str = "Project generation completed successfully!";

const EVENT_CAPACITY: usize = 256;

/// Runs jobs against a shared project root with bounded concurrency.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    artifacts: ArtifactStore,
    generator: Arc<dyn ErasedGenerator>,
    config: JobsConfig,
    /// Queued or running jobs.
    slots: Arc<Semaphore>,
    /// Generator calls in flight.
    workers: Arc<Semaphore>,
    events: broadcast::Sender<JobEvent>,
}

impl JobRunner {
    pub fn new<G: Generator>(
        store: Arc<dyn JobStore>,
        artifacts: ArtifactStore,
        generator: G,
        config: JobsConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                artifacts,
                generator: Arc::new(generator),
                slots: Arc::new(Semaphore::new(config.max_pending)),
                workers: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
                events,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Receive every accepted job transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Validate, create and start a job.
    ///
    /// Must be called from within a Tokio runtime. Returns `Busy` when
    /// `max_pending` jobs are already queued or running.
    pub fn submit(&self, prompt: &str, recursion_limit: Option<u32>) -> Result<JobId, JobError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(JobError::EmptyPrompt);
        }
        let max = self.inner.config.max_recursion_limit;
        let limit = recursion_limit.unwrap_or(self.inner.config.recursion_limit);
        if limit == 0 || limit > max {
            return Err(JobError::InvalidRecursionLimit {
                requested: limit,
                max,
            });
        }

        let slot = Arc::clone(&self.inner.slots)
            .try_acquire_owned()
            .map_err(|_| JobError::Busy {
                capacity: self.inner.config.max_pending,
            })?;

        let job_id = self.inner.store.create(prompt, limit);
        info!(job_id = %job_id, recursion_limit = limit, "job submitted");
        self.spawn(job_id.clone(), prompt.to_string(), limit, Some(slot));
        Ok(job_id)
    }

    /// Start an already created job. Bypasses the pending-slot limit but still
    /// waits for a worker permit.
    pub fn start(
        &self,
        job_id: JobId,
        prompt: impl Into<String>,
        recursion_limit: u32,
    ) -> JoinHandle<()> {
        self.spawn(job_id, prompt.into(), recursion_limit, None)
    }

    fn spawn(
        &self,
        job_id: JobId,
        prompt: String,
        recursion_limit: u32,
        slot: Option<OwnedSemaphorePermit>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let span = info_span!("job", job_id = %job_id);
        tokio::spawn(
            async move {
                inner.run(job_id, prompt, recursion_limit).await;
                drop(slot);
            }
            .instrument(span),
        )
    }
}

impl Inner {
    async fn run(&self, job_id: JobId, prompt: String, recursion_limit: u32) {
        let Ok(_worker) = Arc::clone(&self.workers).acquire_owned().await else {
            self.transition(&job_id, running(MSG_PROCESSING));
            self.fail(
                &job_id,
                GenerationFailure::new(FailureKind::Internal, "worker pool closed"),
            );
            return;
        };

        if !self.transition(&job_id, running(MSG_PROCESSING)) {
            return;
        }

        if self.config.reset_before_run
            && let Err(failure) = self.reset_root().await
        {
            self.fail(&job_id, failure);
            return;
        }

        if !self.transition(&job_id, running(MSG_GENERATING)) {
            return;
        }

        let request = GenerateRequest {
            job_id: job_id.clone(),
            prompt,
            recursion_limit,
            project_root: self.artifacts.root().to_path_buf(),
        };
        match self.generate(request).await {
            Ok(result) => {
                if self.transition(
                    &job_id,
                    JobTransition::Completed {
                        message: MSG_COMPLETED.to_string(),
                        result,
                    },
                ) {
                    info!("job completed");
                }
            }
            Err(failure) => self.fail(&job_id, failure),
        }
    }

    async fn reset_root(&self) -> Result<(), GenerationFailure> {
        let artifacts = self.artifacts.clone();
        match tokio::task::spawn_blocking(move || artifacts.reset()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(GenerationFailure::new(
                FailureKind::Internal,
                format!("reset project root: {err}"),
            )),
            Err(err) => Err(join_failure(err)),
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Value, GenerationFailure> {
        let generator = Arc::clone(&self.generator);
        debug!(recursion_limit = request.recursion_limit, "calling generator");
        tokio::task::spawn_blocking(move || generator.generate_json(&request))
            .await
            .unwrap_or_else(|err| Err(join_failure(err)))
    }

    fn fail(&self, job_id: &JobId, failure: GenerationFailure) {
        warn!(kind = ?failure.kind, error = %failure.message, "job failed");
        self.transition(
            job_id,
            JobTransition::Failed {
                message: format!("Error: {}", failure.message),
                error: failure.message,
            },
        );
    }

    /// Apply and publish a transition. Returns false if the store refused it.
    fn transition(&self, job_id: &JobId, transition: JobTransition) -> bool {
        match self.store.transition(job_id, transition) {
            Ok(job) => {
                // No subscribers is fine.
                let _ = self.events.send(JobEvent {
                    job_id: job.id,
                    status: job.status,
                    message: job.message,
                });
                true
            }
            Err(err) => {
                warn!(err = %err, "job transition rejected");
                false
            }
        }
    }
}

fn running(message: &str) -> JobTransition {
    JobTransition::Running {
        message: message.to_string(),
    }
}

fn join_failure(err: JoinError) -> GenerationFailure {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = panic_message(&*payload);
        GenerationFailure::new(FailureKind::Panic, format!("generator panicked: {message}"))
    } else {
        GenerationFailure::new(FailureKind::Internal, format!("generator task cancelled: {err}"))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::JobStatus;
    use crate::job_store::InMemoryJobStore;
    use crate::test_support::{Outcome, ScriptedGenerator, wait_for_terminal};
    use serde_json::json;

    fn runner(
        temp: &tempfile::TempDir,
        generator: ScriptedGenerator,
        config: JobsConfig,
    ) -> (Arc<InMemoryJobStore>, JobRunner) {
        let store = Arc::new(InMemoryJobStore::new());
        let artifacts = ArtifactStore::new(temp.path().join("project"));
        let runner = JobRunner::new(store.clone(), artifacts, generator, config);
        (store, runner)
    }

    #[test]
    fn submit_rejects_blank_prompt_and_bad_limits() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let temp = tempfile::tempdir().expect("tempdir");
        let (store, runner) = runner(
            &temp,
            ScriptedGenerator::new(Outcome::Succeed(json!({}))),
            JobsConfig::default(),
        );
        let _guard = rt.enter();

        assert_eq!(runner.submit("   ", None), Err(JobError::EmptyPrompt));
        assert_eq!(
            runner.submit("p", Some(0)),
            Err(JobError::InvalidRecursionLimit {
                requested: 0,
                max: 500
            })
        );
        assert_eq!(
            runner.submit("p", Some(501)),
            Err(JobError::InvalidRecursionLimit {
                requested: 501,
                max: 500
            })
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn successful_job_records_progress_and_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = ScriptedGenerator::new(Outcome::Succeed(json!({"files": 1})))
            .with_file("index.html", "<h1>Todo</h1>");
        let (store, runner) = runner(&temp, generator, JobsConfig::default());
        let mut events = runner.subscribe();

        let id = runner.submit("  Build a todo app  ", Some(50)).expect("submit");
        let job = wait_for_terminal(store.as_ref(), &id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.prompt, "Build a todo app");
        assert_eq!(job.recursion_limit, 50);
        assert_eq!(job.message, MSG_COMPLETED);
        assert_eq!(job.result, Some(json!({"files": 1})));
        assert!(temp.path().join("project/index.html").is_file());

        let mut messages = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id, id);
            messages.push(event.message);
        }
        assert_eq!(messages, vec![MSG_PROCESSING, MSG_GENERATING, MSG_COMPLETED]);
    }

    #[tokio::test]
    async fn generator_error_fails_job_with_prefixed_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (store, runner) = runner(
            &temp,
            ScriptedGenerator::new(Outcome::Fail("model unavailable".to_string())),
            JobsConfig::default(),
        );

        let id = runner.submit("p", None).expect("submit");
        let job = wait_for_terminal(store.as_ref(), &id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("model unavailable"));
        assert_eq!(job.message, "Error: model unavailable");
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn start_runs_a_precreated_job() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (store, runner) = runner(
            &temp,
            ScriptedGenerator::new(Outcome::Succeed(json!("done"))),
            JobsConfig::default(),
        );

        let id = store.create("p", 10);
        runner.start(id.clone(), "p", 10).await.expect("join");

        let job = store.get(&id).expect("job");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!("done")));
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42_u8), "unknown panic");
    }
}
