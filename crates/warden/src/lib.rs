//! # Warden - Capability-Mediated Script Host
//!
//! Warden runs untrusted Lua scripts inside a host process. Scripts see no
//! ambient authority: everything they can do with the outside world goes
//! through capability modules bound under fixed namespaces.
//!
//! ## Features
//!
//! - **Pooled execution**: a bounded set of reusable, hardened interpreters
//! - **Mediated network**: every socket, HTTP exchange and DNS query goes
//!   through one driver, direct or proxied
//! - **Confined files**: paths never resolve outside one root directory
//! - **Embeddable**: library-first, with a thin CLI on top
//!
//! ## Quick Start
//!
//! ```no_run
//! use warden::prelude::*;
//!
//! let host = Warden::builder()
//!     .with_root("./sandbox")
//!     .with_proxy("socks5://127.0.0.1:1080")
//!     .with_pool_config(PoolConfig::new().with_max_contexts(4))
//!     .build()?;
//!
//! let outcome = host.do_string(r#"
//!     local http = require("net.http")
//!     local text, status = http.get_string("http://example.com/")
//!     return status
//! "#)?;
//! println!("{:?} in {:?}", outcome.values, outcome.elapsed);
//! # Ok::<(), WardenError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Your Application                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    warden (facade)                      │
//! │        WardenConfig -> HostDependencies -> Catalog      │
//! ├──────────────┬──────────────────┬────────────┬──────────┤
//! │ warden-core  │ warden-capability│ warden-net │ warden-fs│
//! │ (pool,       │ (catalog, leaf   │ (drivers,  │ (confined│
//! │  contexts)   │  modules)        │  http, dns)│  files)  │
//! ├──────────────┴──────────────────┴────────────┴──────────┤
//! │                     mlua (Lua 5.4)                      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod deps;
pub mod error;
pub mod host;

pub use catalog::{standard_builder, standard_catalog};
pub use config::{FsConfig, NetConfig, WardenConfig};
pub use deps::{HostDependencies, build_driver};
pub use error::{WardenError, WardenResult};
pub use host::{Warden, WardenBuilder, WardenHost};

// Re-export from sub-crates
pub use warden_capability;
pub use warden_core;
pub use warden_fs;
pub use warden_net;

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{Warden, WardenBuilder, WardenConfig, WardenError, WardenHost, WardenResult};

    // Core types
    pub use warden_core::{ExecutionPool, PoolConfig, PoolStats, RunOutcome};

    // Capability types
    pub use warden_capability::{CapabilityModule, Catalog, CatalogBuilder, Namespace};

    // Host dependency types
    pub use warden_fs::{FileSystem, RelativeFileSystem};
    pub use warden_net::{DirectDriver, NetDriver, ProxyDriver};

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
