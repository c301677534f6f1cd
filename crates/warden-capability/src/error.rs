//! Error types for the capability system.

use thiserror::Error;

use crate::capability::Namespace;

/// Errors related to capability modules and catalogs.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A namespace string is malformed.
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace {
        /// The rejected namespace.
        namespace: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Two entries of one catalog claim the same namespace.
    #[error("Duplicate namespace in catalog: {0}")]
    DuplicateNamespace(Namespace),

    /// A module factory could not produce its module.
    #[error("Factory for '{namespace}' failed: {reason}")]
    FactoryFailed {
        /// The namespace being built.
        namespace: Namespace,
        /// The reason for failure.
        reason: String,
    },
}

/// Result type for capability operations.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
