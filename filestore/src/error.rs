use std::io;

use thiserror::Error;

use crate::driver::Driver;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors shared by every backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("{operation} is not supported by the {driver} driver")]
    Unsupported {
        driver: Driver,
        operation: &'static str,
    },

    /// The copy step of a copy-then-delete rename succeeded but the delete did
    /// not: the object now exists under both paths.
    #[error("rename {from} -> {to} copied the object but could not remove the source")]
    PartialRename {
        from: String,
        to: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{driver} backend error: {context}")]
    Backend {
        driver: Driver,
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub(crate) fn backend(
        driver: Driver,
        context: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        StorageError::Backend {
            driver,
            context,
            source: source.into(),
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        StorageError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    /// Maps a filesystem error on `path`, surfacing absence as [`StorageError::NotFound`].
    pub(crate) fn from_io(path: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}
