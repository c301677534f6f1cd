//! Warden Capability System
//!
//! This crate defines how host abilities are exposed to guest scripts.
//!
//! # Model
//!
//! - A [`CapabilityModule`] is a host-side object that installs a Lua table
//!   into an interpreter.
//! - Every module is bound under a dotted [`Namespace`] such as `net.tcp`.
//! - A [`CatalogBuilder`] collects ready modules and factories; factories
//!   receive the shared host dependencies exactly once, when the catalog is
//!   built.
//! - The resulting [`Catalog`] is immutable. Namespaces absent from it are
//!   unreachable from guest code.
//!
//! # Usage
//!
//! ```
//! use warden_capability::CatalogBuilder;
//! use warden_capability::builtin::{BitModule, TimeModule};
//! use warden_capability::namespaces;
//!
//! let catalog = CatalogBuilder::<()>::new()
//!     .module(namespaces::BIT.as_str().to_owned(), BitModule::new())
//!     .factory(namespaces::TIME.as_str().to_owned(), |_: &()| Ok(TimeModule::new()))
//!     .build(&())
//!     .unwrap();
//!
//! assert!(catalog.contains("bit"));
//! assert!(!catalog.contains("fs"));
//! ```

pub mod builtin;
pub mod capability;
pub mod catalog;
pub mod error;

pub use capability::{CapabilityModule, Namespace, SharedModule, namespaces};
pub use catalog::{Catalog, CatalogBuilder, CatalogEntry, ModuleSource};
pub use error::{CapabilityError, CapabilityResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capability::{CapabilityModule, Namespace, SharedModule};
    pub use crate::catalog::{Catalog, CatalogBuilder};
    pub use crate::error::{CapabilityError, CapabilityResult};
}
