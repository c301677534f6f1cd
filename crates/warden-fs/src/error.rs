//! Error types for filesystem access.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path is malformed or resolves outside the confinement root.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// Path as given by the caller.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The underlying filesystem call failed.
    #[error("IO error on '{path}': {source}")]
    Io {
        /// Path the operation was applied to.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An open mode string was not recognized.
    #[error("Invalid open mode '{0}'")]
    InvalidMode(String),
}

impl FsError {
    /// Build an `InvalidPath` error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach `path` to an IO error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a confinement or path-syntax rejection.
    pub fn is_invalid_path(&self) -> bool {
        matches!(self, Self::InvalidPath { .. })
    }

    /// Whether the underlying IO error is `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FsError::invalid_path("../etc/passwd", "escapes root");
        assert_eq!(err.to_string(), "Invalid path '../etc/passwd': escapes root");
        assert!(err.is_invalid_path());

        let err = FsError::io("missing", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!err.is_invalid_path());
    }
}
