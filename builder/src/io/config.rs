//! Builder configuration stored in `builder.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Top-level configuration (TOML).
///
/// Missing fields default to values that run a single generation at a time
/// against `./generated_project`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuilderConfig {
    /// Directory that holds every generated artifact.
    pub project_root: PathBuf,

    /// Document served for an empty preview path.
    pub entry_document: String,

    /// Externally visible base URL used by `/preview-url`.
    pub public_base_url: Option<String>,

    /// Where archive scratch files are created (OS temp dir when unset).
    pub archive_scratch_dir: Option<PathBuf>,

    pub jobs: JobsConfig,

    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    /// Step budget used when a submission doesn't name one.
    pub recursion_limit: u32,

    /// Largest step budget a submission may request.
    pub max_recursion_limit: u32,

    /// Generator calls allowed to run at the same time.
    pub max_concurrent: usize,

    /// Jobs allowed to be queued or running at once; further submissions are rejected.
    pub max_pending: usize,

    /// Empty the project root before each generation.
    pub reset_before_run: bool,

    /// Evict finished jobs this many seconds after completion. Unset keeps them forever.
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command (program + args) that performs a generation, e.g. `["python", "-m", "agent"]`.
    pub command: Vec<String>,

    /// Wall-clock budget for one generator process.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Directory for per-job generator logs (`<job_id>.log`).
    pub log_dir: Option<PathBuf>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("generated_project"),
            entry_document: "index.html".to_string(),
            public_base_url: None,
            archive_scratch_dir: None,
            jobs: JobsConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 100,
            max_recursion_limit: 500,
            max_concurrent: 1,
            max_pending: 16,
            reset_before_run: true,
            retention_secs: None,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            log_dir: None,
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.project_root.as_os_str().is_empty() {
            return Err(anyhow!("project_root must not be empty"));
        }
        if self.entry_document.trim().is_empty() {
            return Err(anyhow!("entry_document must not be empty"));
        }
        self.jobs.validate()?;
        self.generator.validate()?;
        Ok(())
    }
}

impl JobsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(anyhow!("jobs.recursion_limit must be > 0"));
        }
        if self.recursion_limit > self.max_recursion_limit {
            return Err(anyhow!(
                "jobs.recursion_limit ({}) must not exceed jobs.max_recursion_limit ({})",
                self.recursion_limit,
                self.max_recursion_limit
            ));
        }
        if self.max_concurrent == 0 {
            return Err(anyhow!("jobs.max_concurrent must be > 0"));
        }
        if self.max_pending < self.max_concurrent {
            return Err(anyhow!(
                "jobs.max_pending ({}) must be >= jobs.max_concurrent ({})",
                self.max_pending,
                self.max_concurrent
            ));
        }
        if self.retention_secs == Some(0) {
            return Err(anyhow!("jobs.retention_secs must be > 0 when set"));
        }
        Ok(())
    }
}

impl GeneratorConfig {
    /// Validate limits. An empty `command` is allowed here; it is checked when a
    /// command-backed generator is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.command.first().is_some_and(|program| program.trim().is_empty()) {
            return Err(anyhow!("generator.command program must not be blank"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BuilderConfig::default()`.
pub fn load_config(path: &Path) -> Result<BuilderConfig> {
    if !path.exists() {
        let cfg = BuilderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BuilderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BuilderConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("builder.toml");
        fs::write(
            &path,
            r#"
project_root = "out"

[jobs]
max_concurrent = 2

[generator]
command = ["python", "-m", "agent"]
"#,
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.project_root, PathBuf::from("out"));
        assert_eq!(cfg.entry_document, "index.html");
        assert_eq!(cfg.jobs.max_concurrent, 2);
        assert_eq!(cfg.jobs.max_pending, 16);
        assert_eq!(cfg.jobs.recursion_limit, 100);
        assert!(cfg.jobs.reset_before_run);
        assert_eq!(cfg.generator.command, vec!["python", "-m", "agent"]);
        assert_eq!(cfg.generator.timeout_secs, 1800);
    }

    #[test]
    fn rejects_pending_below_concurrency() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("builder.toml");
        fs::write(&path, "[jobs]\nmax_concurrent = 4\nmax_pending = 2\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_pending"));
    }

    #[test]
    fn rejects_default_limit_above_maximum() {
        let cfg = JobsConfig {
            recursion_limit: 600,
            ..JobsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_blank_generator_program() {
        let cfg = GeneratorConfig {
            command: vec!["  ".to_string()],
            ..GeneratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
