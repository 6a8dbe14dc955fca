//! Shared application state for the builder server.

use std::sync::Arc;

use builder::core::types::{JobId, JobStatus};
use builder::io::archive::ArchiveBuilder;
use builder::io::artifact_store::ArtifactStore;
use builder::io::preview::PreviewServer;
use builder::job_runner::JobRunner;
use builder::job_store::JobStore;
use tokio::sync::broadcast;

/// Events broadcast to SSE clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    JobUpdated { job_id: JobId, status: JobStatus },
    /// Something under the project root was created, modified or removed.
    ArtifactsChanged,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub runner: JobRunner,
    pub artifacts: ArtifactStore,
    pub preview: PreviewServer,
    pub archive: ArchiveBuilder,
    /// Base URL reported by `/preview-url`; request host is used when unset.
    pub public_base_url: Option<String>,
    /// Broadcast sender for SSE change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(
        runner: JobRunner,
        artifacts: ArtifactStore,
        entry_document: &str,
        archive: ArchiveBuilder,
        public_base_url: Option<String>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            jobs: Arc::clone(runner.store()),
            preview: PreviewServer::new(artifacts.clone(), entry_document),
            runner,
            artifacts,
            archive,
            public_base_url,
            event_tx: Arc::new(event_tx),
        }
    }
}
