use std::fmt;
use std::path::{Component, Path, PathBuf};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaPathError {
    #[error("{} is not under root {}", path.display(), root.display())]
    NotUnderRoot { root: PathBuf, path: PathBuf },
    #[error("relative path {} escapes its root", .0.display())]
    Escapes(PathBuf),
}

/// A discovered file: its root and the path relative to that root.
///
/// The relative part only ever holds normal segments, so joining it onto
/// another root can never climb out of that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MediaPath {
    root: PathBuf,
    relative: PathBuf,
}

impl MediaPath {
    /// Build from a root and a full path found beneath it
    pub fn new(root: &Path, full: &Path) -> Result<Self, MediaPathError> {
        let relative = full.strip_prefix(root).map_err(|_| MediaPathError::NotUnderRoot {
            root: root.to_path_buf(),
            path: full.to_path_buf(),
        })?;
        Self::from_relative(root, relative)
    }

    /// Build from a root and a root-relative path
    pub fn from_relative(root: &Path, relative: &Path) -> Result<Self, MediaPathError> {
        let clean = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean || relative.as_os_str().is_empty() {
            return Err(MediaPathError::Escapes(relative.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            relative: relative.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Absolute (root-joined) path on disk
    pub fn full_path(&self) -> PathBuf {
        self.root.join(&self.relative)
    }

    /// Lowercased extension, if any
    pub fn extension(&self) -> Option<String> {
        self.relative
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
    }
}

impl fmt::Display for MediaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path().display())
    }
}

/// Validated metadata for one file.
///
/// `None` marks a value the prober reported but that failed range checks
/// (or that was never reported). Such values never enter aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaMetadata {
    pub path: MediaPath,
    pub container: String,
    pub frame_count: Option<u64>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: u64,
}

impl MediaMetadata {
    /// `frame_count / fps`, only when both are known
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.frame_count, self.fps) {
            (Some(frames), Some(fps)) if fps > 0.0 => Some(frames as f64 / fps),
            _ => None,
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnomalyReason {
    NegativeFrameCount,
    ZeroFps,
    ProbeFailure,
    UnreadableFile,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyReason::NegativeFrameCount => "negative frame count",
            AnomalyReason::ZeroFps => "zero or negative fps",
            AnomalyReason::ProbeFailure => "probe failed",
            AnomalyReason::UnreadableFile => "file unreadable",
        };
        f.write_str(s)
    }
}

/// A file flagged for manual review
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub path: MediaPath,
    pub reason: AnomalyReason,
    /// Raw value or error text that triggered the flag
    pub detail: String,
}
