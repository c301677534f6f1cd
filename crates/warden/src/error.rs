//! Errors of the Warden host.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from building or running the host.
#[derive(Debug, Error)]
pub enum WardenError {
    /// The configuration file could not be read.
    #[error("Failed to read config '{path}': {source}")]
    ConfigRead {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is malformed or inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// Pool or script error.
    #[error(transparent)]
    Core(#[from] warden_core::CoreError),

    /// Driver or transport error.
    #[error("Network error: {0}")]
    Net(#[from] warden_net::NetError),

    /// Filesystem root error.
    #[error("Filesystem error: {0}")]
    Fs(#[from] warden_fs::FsError),

    /// Catalog error.
    #[error("Capability error: {0}")]
    Capability(#[from] warden_capability::CapabilityError),
}

/// Result type alias for host operations.
pub type WardenResult<T> = std::result::Result<T, WardenError>;
