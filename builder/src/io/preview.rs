//! Serving generated files for in-browser preview.

use minijinja::{Environment, context};
use tracing::debug;

use crate::core::path::normalize_artifact_path;
use crate::error::StoreError;
use crate::io::artifact_store::ArtifactStore;

const LISTING_TEMPLATE: &str = include_str!("templates/listing.html");

/// Result of resolving a preview path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    File {
        bytes: Vec<u8>,
        content_type: String,
    },
    /// The entry document is missing; an HTML index of every artifact.
    Fallback { html: String },
    NotFound,
}

#[derive(Debug, Clone)]
pub struct PreviewServer {
    store: ArtifactStore,
    entry_document: String,
    link_prefix: String,
}

impl PreviewServer {
    pub fn new(store: ArtifactStore, entry_document: impl Into<String>) -> Self {
        Self {
            store,
            entry_document: entry_document.into(),
            link_prefix: "/preview/".to_string(),
        }
    }

    pub fn entry_document(&self) -> &str {
        &self.entry_document
    }

    /// Resolve `raw`; an empty path (or the entry document itself) means the entry document.
    pub fn resolve(&self, raw: &str) -> Result<PreviewOutcome, StoreError> {
        let wants_entry = raw.trim_matches('/').is_empty()
            || normalize_artifact_path(raw)
                .is_ok_and(|path| path.as_str() == self.entry_document.as_str());

        let target = if wants_entry {
            self.entry_document.as_str()
        } else {
            raw
        };

        match self.store.read(target) {
            Ok(bytes) => Ok(PreviewOutcome::File {
                content_type: content_type_for(target),
                bytes,
            }),
            Err(StoreError::NotFound(_)) if wants_entry => {
                debug!(entry = %self.entry_document, "entry document missing, rendering listing");
                Ok(PreviewOutcome::Fallback {
                    html: self.render_listing()?,
                })
            }
            Err(StoreError::NotFound(_)) => Ok(PreviewOutcome::NotFound),
            Err(err) => Err(err),
        }
    }

    fn render_listing(&self) -> Result<String, StoreError> {
        let files = self.store.list()?;
        let mut env = Environment::new();
        env.add_template("listing.html", LISTING_TEMPLATE)?;
        let html = env.get_template("listing.html")?.render(context! {
            entry_document => self.entry_document.as_str(),
            prefix => self.link_prefix.as_str(),
            files => files,
        })?;
        Ok(html)
    }
}

/// MIME type from the file extension; unknown types are `application/octet-stream`.
pub fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
