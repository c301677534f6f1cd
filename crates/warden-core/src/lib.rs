//! Warden Core - Script Execution Runtime
//!
//! This crate runs untrusted Lua scripts on a bounded pool of reusable
//! interpreters:
//!
//! - [`ExecutionContext`]: one hardened interpreter with a capability
//!   catalog bound behind `require`
//! - [`ExecutionPool`]: hands contexts out exclusively and takes them back
//! - [`PoolConfig`]: pool bounds, timeouts and recycling rules
//!
//! # Quick Start
//!
//! ```
//! use warden_core::prelude::*;
//!
//! let pool = ExecutionPool::builder()
//!     .with_config(PoolConfig::minimal())
//!     .build()?;
//!
//! let outcome = pool.do_string("return 6 * 7")?;
//! assert_eq!(outcome.values, vec!["42"]);
//! # Ok::<(), CoreError>(())
//! ```
//!
//! # Isolation
//!
//! 1. **Pure standard library**: no `io`, `os`, `debug` or `package`
//! 2. **Catalog only**: `require` resolves bound namespaces and nothing else
//! 3. **Read-only modules**: shared tables cannot be patched by a guest
//! 4. **Fresh environment per run**: globals never leak between runs
//! 5. **Limits**: wall-clock timeout and a heap cap per context

pub mod config;
pub mod context;
pub mod error;
pub mod pool;
pub mod sandbox;

// Re-export main types at crate root
pub use config::PoolConfig;
pub use context::{ContextId, DiscardReason, ExecutionContext, RunOutcome};
pub use error::{CoreError, CoreResult};
pub use pool::{ExecutionPool, ExecutionPoolBuilder, PoolStats, PooledContext};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::context::{ContextId, ExecutionContext, RunOutcome};
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::pool::{ExecutionPool, PoolStats, PooledContext};
}
