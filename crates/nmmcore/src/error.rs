//! Error taxonomy shared by every engine component.
//!
//! Inspector, store and registry errors abort the operation that raised
//! them. Per-path activation failures are collected into a
//! [`SyncReport`](crate::activation::SyncReport) instead of being returned
//! here, but they use [`Error::PathWriteFailed`] as their description.

use std::io;
use std::path::{Path, PathBuf};

/// Everything that can go wrong inside `nmmcore`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read archive {path:?}: {reason}")]
    ArchiveUnreadable { path: PathBuf, reason: String },

    #[error("archive {0:?} contains no files")]
    ArchiveEmpty(PathBuf),

    #[error("a mod named \"{0}\" is already installed")]
    DuplicateModName(String),

    #[error("invalid mod name \"{0}\"")]
    InvalidModName(String),

    #[error("mod \"{0}\" not found")]
    ModNotFound(String),

    #[error("position {position} is out of bounds for {len} mod(s)")]
    InvalidPosition { position: usize, len: usize },

    #[error("failed to write {path}: {reason}")]
    PathWriteFailed { path: String, reason: String },

    #[error("metadata for \"{name}\" is unreadable: {reason}")]
    StorageCorrupt { name: String, reason: String },

    #[error("managed storage {0:?} is in use by another instance")]
    StorageLocked(PathBuf),

    #[error("config {path:?} is unreadable: {reason}")]
    ConfigCorrupt { path: PathBuf, reason: String },

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("no game directory has been selected")]
    GameDirectoryUnset,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn unreadable(path: &Path, reason: impl ToString) -> Self {
        Error::ArchiveUnreadable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Attach a path to an `io::Result`, in the spirit of `anyhow::Context`.
pub(crate) trait IoContext<T> {
    fn with_path(self, what: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, what: &str, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(format!("{what} {path:?}"), e))
    }
}
