//! Error types for tether-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from ignore resolution, tree walks and archives.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line of the ignore file is not a valid glob.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// A path could not be read while expanding an ignore pattern.
    #[error("ignore expansion failed: {0}")]
    Glob(#[from] glob::GlobError),

    /// The tree walk failed below the watched root.
    #[error("walk failed under {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// An archive entry would escape the destination directory.
    #[error("refusing archive entry outside destination: {path}")]
    UnsafeEntryPath { path: String },
}

impl SyncError {
    /// The underlying `io::ErrorKind`, when this error wraps an I/O failure.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            SyncError::Io { source, .. } => Some(source.kind()),
            SyncError::Walk { source, .. } => source.io_error().map(|e| e.kind()),
            SyncError::Glob(err) => Some(err.error().kind()),
            _ => None,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
