//! Builder server - HTTP API for prompt-driven project generation.

mod error;
mod retention;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use builder::io::archive::ArchiveBuilder;
use builder::io::artifact_store::ArtifactStore;
use builder::io::config::load_config;
use builder::io::generator::CommandGenerator;
use builder::job_runner::JobRunner;
use builder::job_store::{InMemoryJobStore, JobStore};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "builder-server")]
#[command(about = "Job queue, artifact store and preview server for generated projects")]
struct Args {
    /// Address to bind the server to
    #[arg(long, env = "BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Path to builder.toml (defaults are used if it doesn't exist)
    #[arg(long, env = "BUILDER_CONFIG", default_value = "builder.toml")]
    config: PathBuf,

    /// Override `project_root` from the config file
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Override `generator.command`, split on whitespace (e.g. "python -m agent")
    #[arg(long)]
    generator_cmd: Option<String>,

    /// Directory containing UI static files (served for unmatched paths)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    builder::logging::init();

    let args = Args::parse();

    let mut config = load_config(&args.config)
        .with_context(|| format!("load config {}", args.config.display()))?;
    if let Some(root) = args.project_root {
        config.project_root = root;
    }
    if let Some(cmd) = args.generator_cmd {
        config.generator.command = cmd.split_whitespace().map(str::to_string).collect();
    }
    config.validate()?;

    let artifacts = ArtifactStore::new(config.project_root.clone());
    artifacts.ensure_root()?;
    info!(project_root = %artifacts.root().display(), "starting builder-server");

    let generator = CommandGenerator::new(&config.generator)
        .context("set [generator].command in the config file or pass --generator-cmd")?;
    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let runner = JobRunner::new(jobs, artifacts.clone(), generator, config.jobs.clone());
    let archive = ArchiveBuilder::new(artifacts.clone(), config.archive_scratch_dir.clone());
    let state = AppState::new(
        runner,
        artifacts,
        &config.entry_document,
        archive,
        config.public_base_url.clone(),
    );

    sse::start_file_watcher(state.clone());
    sse::start_job_forwarder(state.clone());
    if let Some(secs) = config.jobs.retention_secs {
        retention::start_sweeper(Arc::clone(&state.jobs), Duration::from_secs(secs));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = routes::app_router().layer(cors).with_state(state);

    if let Some(ui_dir) = args.ui_dir {
        if ui_dir.exists() {
            info!(ui_dir = %ui_dir.display(), "serving static UI files");
            app = app
                .fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
        } else {
            info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
        }
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
