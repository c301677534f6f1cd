//! Warden Filesystem Layer
//!
//! Guest scripts reach files only through a [`FileSystem`]. The host
//! normally hands them a [`RelativeFileSystem`], which confines every path
//! below one root directory and forwards the real work to
//! [`NativeFileSystem`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use warden_fs::{FileSystem, OpenFlags, RelativeFileSystem};
//!
//! let fs = RelativeFileSystem::native("./sandbox")?;
//! assert!(fs.open(Path::new("../etc/passwd"), OpenFlags::read_only()).is_err());
//! # Ok::<(), warden_fs::FsError>(())
//! ```

pub mod error;
pub mod filesystem;
pub mod modules;
pub mod native;
pub mod relative;

// Re-export main types
pub use error::{FsError, FsResult};
pub use filesystem::{
    FileHandle, FileInfo, FileStream, FileSystem, OpenFlags, SharedFileSystem, Visit, WalkVisitor,
};
pub use modules::{FsModule, FsUtilsModule, LuaFile};
pub use native::NativeFileSystem;
pub use relative::RelativeFileSystem;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{FsError, FsResult};
    pub use crate::filesystem::{FileSystem, OpenFlags, SharedFileSystem, Visit};
    pub use crate::native::NativeFileSystem;
    pub use crate::relative::RelativeFileSystem;
}
