//! Confined file access under the project root.
//!
//! Every operation normalizes the client path first and then checks that the
//! deepest existing ancestor, with symlinks resolved, still lives under the
//! root. Nothing outside the root is ever read, written or deleted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use crate::core::path::{ArtifactPath, PathRejection, normalize_artifact_path, relative_display};
use crate::core::size::format_size;
use crate::error::StoreError;

/// One file in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactEntry {
    pub path: String,
    pub size: u64,
    pub size_human: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io("create", &self.root, e))
    }

    /// Every regular file below the root, sorted by path. Empty if the root is missing.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn list(&self) -> Result<Vec<ArtifactEntry>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                StoreError::io("walk", path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = relative_display(&self.root, entry.path()) else {
                debug!(path = %entry.path().display(), "skipping non UTF-8 artifact name");
                continue;
            };
            let size = entry
                .metadata()
                .map_err(|e| StoreError::io("stat", entry.path(), e.into()))?
                .len();
            entries.push(ArtifactEntry {
                path,
                size,
                size_human: format_size(size),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    #[instrument(skip_all, fields(path = %raw))]
    pub fn read(&self, raw: &str) -> Result<Vec<u8>, StoreError> {
        let (path, full) = self.resolve(raw)?;
        if !full.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        fs::read(&full).map_err(|e| not_found_or_io(e, &path, "read", &full))
    }

    /// Create or overwrite a file, creating parent directories.
    #[instrument(skip_all, fields(path = %raw, bytes = contents.len()))]
    pub fn write(&self, raw: &str, contents: &[u8]) -> Result<ArtifactPath, StoreError> {
        let (path, full) = self.resolve(raw)?;
        if full.is_dir() {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "path is a directory",
            });
        }
        let anchor = deepest_existing(&full);
        if anchor != full && !anchor.is_dir() {
            return Err(StoreError::InvalidPath {
                path: path.to_string(),
                reason: "a parent path component is a file",
            });
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create", parent, e))?;
        }
        fs::write(&full, contents).map_err(|e| StoreError::io("write", &full, e))?;
        debug!("artifact written");
        Ok(path)
    }

    /// Overwrite an existing file. Missing files are `NotFound`.
    #[instrument(skip_all, fields(path = %raw, bytes = contents.len()))]
    pub fn update(&self, raw: &str, contents: &[u8]) -> Result<ArtifactPath, StoreError> {
        let (path, full) = self.resolve(raw)?;
        if !full.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        fs::write(&full, contents).map_err(|e| StoreError::io("write", &full, e))?;
        Ok(path)
    }

    #[instrument(skip_all, fields(path = %raw))]
    pub fn delete(&self, raw: &str) -> Result<ArtifactPath, StoreError> {
        let (path, full) = self.resolve(raw)?;
        if !full.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        fs::remove_file(&full).map_err(|e| not_found_or_io(e, &path, "delete", &full))?;
        debug!("artifact deleted");
        Ok(path)
    }

    pub fn exists(&self, raw: &str) -> Result<bool, StoreError> {
        let (_, full) = self.resolve(raw)?;
        Ok(full.is_file())
    }

    /// Empty the root, leaving an existing (possibly new) empty directory.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn reset(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io("remove", &self.root, e)),
        }
        self.ensure_root()?;
        info!("project root reset");
        Ok(())
    }

    /// Normalize `raw` and map it below the root, refusing symlink escapes.
    fn resolve(&self, raw: &str) -> Result<(ArtifactPath, PathBuf), StoreError> {
        let path = normalize_artifact_path(raw).map_err(|r| StoreError::invalid(raw, r))?;
        let full = path.to_fs_path(&self.root);

        if self.root.exists() {
            let canonical_root = fs::canonicalize(&self.root)
                .map_err(|e| StoreError::io("resolve", &self.root, e))?;
            let anchor = deepest_existing(&full);
            let canonical_anchor =
                fs::canonicalize(anchor).map_err(|e| StoreError::io("resolve", anchor, e))?;
            if !canonical_anchor.starts_with(&canonical_root) || has_dangling_link(anchor, &full) {
                return Err(StoreError::invalid(raw, PathRejection::EscapesRoot));
            }
        }
        Ok((path, full))
    }
}

/// Walk up from `path` to the closest ancestor that exists on disk.
fn deepest_existing(path: &Path) -> &Path {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// True if any component below `anchor` is a symlink that doesn't resolve.
fn has_dangling_link(anchor: &Path, full: &Path) -> bool {
    full.ancestors()
        .take_while(|p| *p != anchor)
        .any(|p| fs::symlink_metadata(p).is_ok_and(|m| m.file_type().is_symlink()))
}

fn not_found_or_io(
    err: std::io::Error,
    path: &ArtifactPath,
    action: &'static str,
    full: &Path,
) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(path.to_string())
    } else {
        StoreError::io(action, full, err)
    }
}
