//! Test-only generators and helpers for driving jobs without real backends.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::types::{Job, JobId};
use crate::io::artifact_store::ArtifactStore;
use crate::io::generator::{GenerateRequest, Generator};
use crate::job_store::JobStore;

/// How a [`ScriptedGenerator`] finishes after writing its files.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(Value),
    Fail(String),
    Panic(String),
}

/// Writes a fixed set of files into the project root, then returns `outcome`.
#[derive(Debug, Clone)]
pub struct ScriptedGenerator {
    files: Vec<(String, Vec<u8>)>,
    outcome: Outcome,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            files: Vec::new(),
            outcome,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files
            .push((path.to_string(), contents.as_bytes().to_vec()));
        self
    }

    /// Sleep before writing anything.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `generate` calls; survives moving the generator into a runner.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Generator for ScriptedGenerator {
    type Output = Value;

    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        for (path, contents) in &self.files {
            let full = request.project_root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&full, contents)?;
        }
        match &self.outcome {
            Outcome::Succeed(value) => Ok(value.clone()),
            Outcome::Fail(message) => Err(anyhow!(message.clone())),
            Outcome::Panic(message) => panic!("{message}"),
        }
    }
}

/// Returns the request it was given; writes nothing.
#[derive(Debug, Clone, Default)]
pub struct PromptEchoGenerator;

impl Generator for PromptEchoGenerator {
    type Output = Value;

    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        Ok(json!({
            "jobId": request.job_id.as_str(),
            "userPrompt": request.prompt,
            "recursionLimit": request.recursion_limit,
        }))
    }
}

/// Produces a map with tuple keys, which JSON can't represent.
#[derive(Debug, Clone, Default)]
pub struct UnserializableGenerator;

impl Generator for UnserializableGenerator {
    type Output = HashMap<(i32, i32), i32>;

    fn generate(&self, _request: &GenerateRequest) -> Result<Self::Output> {
        Ok(HashMap::from([((0, 0), 1)]))
    }
}

/// One-shot latch that blocking generators can wait on.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().expect("gate lock") = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().expect("gate lock");
        while !*open {
            open = cvar.wait(open).expect("gate wait");
        }
    }
}

/// Blocks every generation until its gate opens.
#[derive(Debug, Clone)]
pub struct GatedGenerator {
    gate: Gate,
    started: Arc<AtomicUsize>,
}

impl GatedGenerator {
    pub fn new(gate: Gate) -> Self {
        Self {
            gate,
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of generations that have begun waiting.
    pub fn started_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.started)
    }
}

impl Generator for GatedGenerator {
    type Output = Value;

    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
        Ok(json!({"jobId": request.job_id.as_str()}))
    }
}

/// Write `(path, contents)` pairs through the store.
pub fn seed_files(store: &ArtifactStore, files: &[(&str, &str)]) {
    for (path, contents) in files {
        store
            .write(path, contents.as_bytes())
            .unwrap_or_else(|err| panic!("seed {path}: {err}"));
    }
}

/// Poll until the job is terminal. Panics after five seconds.
pub async fn wait_for_terminal(store: &dyn JobStore, id: &JobId) -> Job {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = store.get(id).expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} still {} after 5s",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `counter` reaches `target`. Panics after five seconds.
pub async fn wait_for_count(counter: &AtomicUsize, target: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < target {
        assert!(Instant::now() < deadline, "counter never reached {target}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
