//! The filesystem abstraction shared by the `fs` modules.

use std::fmt;
use std::fs::{Metadata, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FsError, FsResult};

/// Metadata of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Final path component.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether this is a directory.
    pub is_dir: bool,
    /// Whether this is a symbolic link (not followed).
    pub is_symlink: bool,
    /// Permission bits.
    pub mode: u32,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
}

impl FileInfo {
    /// Build from `std` metadata.
    pub fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> Self {
        Self {
            name: name.into(),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
            mode: permission_bits(metadata),
            modified: metadata.modified().ok(),
        }
    }

    /// Modification time as whole seconds since the Unix epoch.
    pub fn modified_unix(&self) -> Option<i64> {
        let modified = self.modified?;
        match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_secs()).ok(),
            Err(e) => i64::try_from(e.duration().as_secs()).ok().map(|s| -s),
        }
    }
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() { 0o444 } else { 0o644 }
}

/// How a file is opened, parsed from `fopen`-style mode strings.
///
/// | mode | read | write | create | truncate | append |
/// |------|------|-------|--------|----------|--------|
/// | `r`  | yes  |       |        |          |        |
/// | `w`  |      | yes   | yes    | yes      |        |
/// | `a`  |      | yes   | yes    |          | yes    |
/// | `r+` | yes  | yes   |        |          |        |
/// | `w+` | yes  | yes   | yes    | yes      |        |
/// | `a+` | yes  | yes   | yes    |          | yes    |
///
/// A `b` anywhere in the mode is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Writes go to the end of the file.
    pub append: bool,
    /// Create the file if missing.
    pub create: bool,
    /// Truncate an existing file.
    pub truncate: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Create or truncate for writing.
    pub fn write_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Create if missing and append.
    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }

    /// Whether the flags may create or modify files.
    pub fn writes(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }

    /// Translate to `std` open options.
    pub fn to_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .truncate(self.truncate);
        options
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        let normalized: String = mode.chars().filter(|&c| c != 'b').collect();
        let flags = match normalized.as_str() {
            "r" => Self::read_only(),
            "w" => Self::write_truncate(),
            "a" => Self::append(),
            "r+" => Self {
                read: true,
                write: true,
                ..Self::default()
            },
            "w+" => Self {
                read: true,
                ..Self::write_truncate()
            },
            "a+" => Self {
                read: true,
                ..Self::append()
            },
            _ => return Err(FsError::InvalidMode(mode.to_owned())),
        };
        Ok(flags)
    }
}

/// An open file.
pub trait FileStream: Read + Write + Seek + Send + fmt::Debug {
    /// Metadata of the open file.
    fn stat(&self) -> FsResult<FileInfo>;
}

/// Boxed open file.
pub type FileHandle = Box<dyn FileStream>;

/// What a walk should do after visiting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep walking.
    Continue,
    /// Do not descend into this directory. Ignored for non-directories.
    SkipDir,
    /// End the walk successfully.
    Stop,
}

/// Visitor of [`FileSystem::walk`].
///
/// Receives every path with either its metadata or the error met while
/// reading it. Returning an error aborts the walk with that error.
pub type WalkVisitor<'a> = dyn FnMut(&Path, FsResult<FileInfo>) -> FsResult<Visit> + 'a;

/// Filesystem operations available to guest modules.
///
/// Paths are interpreted by the implementation; a confining wrapper such as
/// [`RelativeFileSystem`](crate::RelativeFileSystem) treats them as relative
/// to its root.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Open `path` with `flags`.
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<FileHandle>;

    /// Metadata of `path`, following symbolic links.
    fn stat(&self, path: &Path) -> FsResult<FileInfo>;

    /// Remove a file or an empty directory.
    fn remove(&self, path: &Path) -> FsResult<()>;

    /// Rename `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> FsResult<()>;

    /// Whether `path` exists. Never fails.
    fn exist(&self, path: &Path) -> bool;

    /// Create one directory with permission bits `mode`.
    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()>;

    /// Visit `root` and everything below it, depth first, in lexical order.
    fn walk(&self, root: &Path, visit: &mut WalkVisitor<'_>) -> FsResult<()>;
}

/// Shared filesystem handle.
pub type SharedFileSystem = Arc<dyn FileSystem>;
