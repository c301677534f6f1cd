//! Core error types for script execution.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while hosting and running guest scripts.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No context became free within the acquire timeout.
    #[error("Execution pool exhausted: {max_contexts} contexts busy after waiting {waited:?}")]
    PoolExhausted {
        /// Configured context bound.
        max_contexts: usize,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A catalog module could not be installed into a fresh context.
    #[error("Failed to bind '{namespace}': {reason}")]
    CatalogBindingFailed {
        /// Namespace of the failing module.
        namespace: String,
        /// Underlying error.
        reason: String,
    },

    /// The script could not be read or compiled.
    #[error("Failed to load '{chunk}': {message}")]
    ScriptLoadError {
        /// Chunk name (file path or `inline`).
        chunk: String,
        /// Compiler or IO message.
        message: String,
    },

    /// The script raised an error it did not catch.
    #[error("Script '{chunk}' failed: {message}")]
    ScriptRuntimeError {
        /// Chunk name.
        chunk: String,
        /// Guest error message, with traceback when available.
        message: String,
    },

    /// The run exceeded its wall-clock limit.
    #[error("Script '{chunk}' exceeded the execution timeout of {limit:?}")]
    ExecutionTimeout {
        /// Chunk name.
        chunk: String,
        /// Configured limit.
        limit: Duration,
    },

    /// Interpreter error outside of a script run.
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
