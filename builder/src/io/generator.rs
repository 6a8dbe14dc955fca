//! Generator abstraction for project generation.
//!
//! The [`Generator`] trait decouples the job runner from the backend that
//! turns a prompt into files. [`CommandGenerator`] runs an external command;
//! tests use scripted generators that write fixed files without spawning
//! processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::types::JobId;
use crate::io::config::GeneratorConfig;
use crate::io::process::{ProcessOutput, run_with_timeout};

/// Parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub job_id: JobId,
    pub prompt: String,
    /// Step budget the generator must honor.
    pub recursion_limit: u32,
    /// Directory the generator writes artifacts into.
    pub project_root: PathBuf,
}

/// Backend that turns a prompt into a tree of artifacts.
///
/// Implementations run on the blocking thread pool and may take minutes.
/// The returned value becomes the job's `result` after JSON serialization.
pub trait Generator: Send + Sync + 'static {
    type Output: Serialize;

    fn generate(&self, request: &GenerateRequest) -> Result<Self::Output>;
}

/// What went wrong while producing a job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The generator returned an error.
    Generator,
    /// The output could not be represented as JSON.
    Serialization,
    /// The generator panicked.
    Panic,
    /// Anything around the generator call (reset, task join).
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Object-safe view of a [`Generator`] whose output is already JSON.
pub(crate) trait ErasedGenerator: Send + Sync {
    fn generate_json(&self, request: &GenerateRequest) -> Result<Value, GenerationFailure>;
}

impl<G: Generator> ErasedGenerator for G {
    fn generate_json(&self, request: &GenerateRequest) -> Result<Value, GenerationFailure> {
        let output = self
            .generate(request)
            .map_err(|err| GenerationFailure::new(FailureKind::Generator, format!("{err:#}")))?;
        serde_json::to_value(output).map_err(|err| {
            GenerationFailure::new(
                FailureKind::Serialization,
                format!("result is not serializable: {err}"),
            )
        })
    }
}

/// Generator that spawns the configured command in the project root.
///
/// The prompt is written to stdin. The command learns its job through
/// `BUILDER_JOB_ID`, `BUILDER_PROJECT_ROOT`, `BUILDER_RECURSION_LIMIT` and may
/// write a JSON result to `BUILDER_OUTPUT_PATH`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    log_dir: Option<PathBuf>,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        config.validate()?;
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator.command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            log_dir: config.log_dir.clone(),
        })
    }
}

impl Generator for CommandGenerator {
    type Output = Value;

    #[instrument(skip_all, fields(job_id = %request.job_id, program = %self.program))]
    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        info!(root = %request.project_root.display(), "starting generator command");

        fs::create_dir_all(&request.project_root)
            .with_context(|| format!("create project root {}", request.project_root.display()))?;
        // The child runs inside the root, so hand it an absolute path.
        let root = fs::canonicalize(&request.project_root)
            .with_context(|| format!("resolve project root {}", request.project_root.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix("builder_output_")
            .tempdir()
            .context("create generator scratch dir")?;
        let output_path = scratch.path().join("result.json");

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&root)
            .env("BUILDER_JOB_ID", request.job_id.as_str())
            .env("BUILDER_PROJECT_ROOT", &root)
            .env("BUILDER_RECURSION_LIMIT", request.recursion_limit.to_string())
            .env("BUILDER_OUTPUT_PATH", &output_path);

        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes().to_vec()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run generator {}", self.program))?;

        if let Some(dir) = &self.log_dir {
            let log_path = dir.join(format!("{}.log", request.job_id));
            if let Err(err) = write_generator_log(&log_path, &output) {
                warn!(err = %format!("{err:#}"), "failed to write generator log");
            }
        }

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            bail!("generator timed out after {}s", self.timeout.as_secs());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            let stderr = output.stderr.tail(500);
            if stderr.is_empty() {
                bail!("generator exited with status {:?}", output.status.code());
            }
            bail!(
                "generator exited with status {:?}: {stderr}",
                output.status.code()
            );
        }

        debug!("generator completed");
        read_result(&output_path, &request.prompt)
    }
}

fn read_result(path: &Path, prompt: &str) -> Result<Value> {
    if !path.exists() {
        return Ok(json!({
            "userPrompt": prompt,
            "message": "Project generated successfully",
        }));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read generator output {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_generator_log(path: &Path, output: &ProcessOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create generator log dir {}", parent.display()))?;
    }
    fs::write(path, output.render_log())
        .with_context(|| format!("write generator log {}", path.display()))
}
