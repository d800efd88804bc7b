use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while discovering, loading or playing segments.
///
/// Only `InvalidPath`, `Metadata` and `SegmentNotFound` abort a segment load.
/// `AssetMissing` and `Decode` are soft: the loader logs them and the line
/// plays as a timed, text-only line.
#[derive(Error, Debug)]
pub enum ShowError {
    #[error("invalid path '{}': {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("bad metadata in '{}': {reason}", path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("segment folder '{}' no longer exists", .0.display())]
    SegmentNotFound(PathBuf),

    #[error("no audio asset for '{key}'")]
    AssetMissing { key: String },

    #[error("cannot decode '{}': {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("audio output error: {0}")]
    Audio(String),

    #[error("state file error: {0}")]
    State(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ShowError {
    /// True for the errors that abort loading a single segment.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ShowError::InvalidPath { .. }
                | ShowError::Metadata { .. }
                | ShowError::SegmentNotFound(_)
        )
    }

    pub(crate) fn invalid_path(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ShowError::InvalidPath {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn metadata(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ShowError::Metadata {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ShowError>;
