//! Lexical normalization of root-relative artifact paths.
//!
//! Normalization never touches the filesystem. It only guarantees that the
//! result, joined onto the project root, names a descendant of that root;
//! symlink containment is checked separately by the artifact store.

use std::fmt;
use std::path::{Path, PathBuf};

/// A normalized, `/`-separated path relative to the project root.
///
/// Never empty, never absolute, never contains `.`/`..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactPath(String);

impl ArtifactPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join onto `root`, one component per segment.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut full = root.to_path_buf();
        for segment in self.0.split('/') {
            full.push(segment);
        }
        full
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a raw path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    Empty,
    Absolute,
    EscapesRoot,
    NulByte,
}

impl PathRejection {
    pub fn reason(self) -> &'static str {
        match self {
            PathRejection::Empty => "path is empty",
            PathRejection::Absolute => "absolute paths are not allowed",
            PathRejection::EscapesRoot => "path escapes the project root",
            PathRejection::NulByte => "path contains a NUL byte",
        }
    }
}

/// Normalize a client-supplied path.
///
/// `\` counts as a separator, empty and `.` segments are dropped, `..` pops the
/// previous segment and is rejected once it would climb above the root.
pub fn normalize_artifact_path(raw: &str) -> Result<ArtifactPath, PathRejection> {
    if raw.contains('\0') {
        return Err(PathRejection::NulByte);
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(PathRejection::Absolute);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PathRejection::EscapesRoot);
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(PathRejection::Empty);
    }
    Ok(ArtifactPath(segments.join("/")))
}

/// Render a filesystem path below `root` as a `/`-separated relative path.
pub fn relative_display(root: &Path, full: &Path) -> Option<String> {
    let rel = full.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    let parts = parts?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
