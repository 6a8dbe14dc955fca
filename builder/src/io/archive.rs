//! Zip snapshots of the artifact tree.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, instrument};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::StoreError;
use crate::io::artifact_store::ArtifactStore;

/// File name clients receive for a download.
pub const ARCHIVE_FILE_NAME: &str = "generated_project.zip";

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    store: ArtifactStore,
    scratch_dir: Option<PathBuf>,
}

/// A finished archive on disk. Dropping the handle deletes the file.
#[derive(Debug)]
pub struct ArchiveHandle {
    file: NamedTempFile,
    len: u64,
    entries: usize,
}

impl ArchiveHandle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of files in the archive.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// A fresh read handle positioned at the start of the archive.
    pub fn reopen(&self) -> Result<File, StoreError> {
        self.file
            .reopen()
            .map_err(|e| StoreError::io("reopen", self.path(), e))
    }
}

impl ArchiveBuilder {
    pub fn new(store: ArtifactStore, scratch_dir: Option<PathBuf>) -> Self {
        Self { store, scratch_dir }
    }

    /// Compress every artifact into a scratch zip file.
    ///
    /// Entry names are the root-relative artifact paths. Fails with
    /// `EmptyProject` when there is nothing to archive.
    #[instrument(skip_all, fields(root = %self.store.root().display()))]
    pub fn build(&self) -> Result<ArchiveHandle, StoreError> {
        let artifacts = self.store.list()?;
        if artifacts.is_empty() {
            return Err(StoreError::EmptyProject);
        }

        let mut file = self.scratch_file()?;
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        {
            let mut zip = ZipWriter::new(file.as_file_mut());
            for artifact in &artifacts {
                let bytes = self.store.read(&artifact.path)?;
                zip.start_file(artifact.path.as_str(), options)?;
                zip.write_all(&bytes)
                    .map_err(|e| StoreError::io("compress", artifact.path.as_str(), e))?;
            }
            zip.finish()?;
        }

        let len = file
            .as_file_mut()
            .seek(SeekFrom::End(0))
            .map_err(|e| StoreError::io("seek", file.path(), e))?;
        info!(entries = artifacts.len(), bytes = len, "archive built");
        Ok(ArchiveHandle {
            file,
            len,
            entries: artifacts.len(),
        })
    }

    fn scratch_file(&self) -> Result<NamedTempFile, StoreError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("generated_project_").suffix(".zip");
        match &self.scratch_dir {
            Some(dir) => {
                fs::create_dir_all(dir).map_err(|e| StoreError::io("create", dir, e))?;
                builder
                    .tempfile_in(dir)
                    .map_err(|e| StoreError::io("create scratch file in", dir, e))
            }
            None => builder
                .tempfile()
                .map_err(|e| StoreError::io("create scratch file in", std::env::temp_dir(), e)),
        }
    }
}
