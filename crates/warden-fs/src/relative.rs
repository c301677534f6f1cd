//! A filesystem confined below one root directory.
//!
//! Every path argument is interpreted relative to the root:
//!
//! 1. The path is normalized lexically. `.` is dropped, `..` removes the
//!    previous component, and a leading `/` is ignored. A `..` with nothing
//!    left to remove is rejected.
//! 2. The joined path, or its nearest existing ancestor, is canonicalized
//!    and must still lie below the canonical root. This catches symbolic
//!    links pointing elsewhere.
//!
//! Rejections are reported as [`FsError::InvalidPath`] and never reach the
//! delegate filesystem.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{FsError, FsResult};
use crate::filesystem::{FileHandle, FileInfo, FileSystem, OpenFlags, SharedFileSystem, Visit, WalkVisitor};
use crate::native::NativeFileSystem;

/// Lexically normalize `path` into a root-relative path.
pub fn normalize(path: &Path) -> FsResult<PathBuf> {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(FsError::invalid_path(path, "escapes the root directory"));
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }
    Ok(parts.iter().collect())
}

/// A [`FileSystem`] that confines a delegate below `root`.
#[derive(Debug, Clone)]
pub struct RelativeFileSystem {
    root: PathBuf,
    delegate: SharedFileSystem,
}

impl RelativeFileSystem {
    /// Confine `delegate` below `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>, delegate: SharedFileSystem) -> FsResult<Self> {
        let given = root.as_ref();
        let root = fs::canonicalize(given).map_err(|e| FsError::io(given, e))?;
        if !root.is_dir() {
            return Err(FsError::invalid_path(given, "root is not a directory"));
        }
        info!(root = %root.display(), delegate = ?delegate, "Confined filesystem ready");
        Ok(Self { root, delegate })
    }

    /// Confine the host filesystem below `root`.
    pub fn native(root: impl AsRef<Path>) -> FsResult<Self> {
        Self::new(root, Arc::new(NativeFileSystem::new()))
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a caller path to the host path it denotes.
    ///
    /// # Errors
    ///
    /// `InvalidPath` when the path leaves the root lexically or through a
    /// symbolic link.
    pub fn resolve(&self, path: &Path) -> FsResult<PathBuf> {
        let joined = self.root.join(normalize(path)?);
        self.check_canonical(path, &joined)?;
        Ok(joined)
    }

    fn check_canonical(&self, shown: &Path, joined: &Path) -> FsResult<()> {
        let mut ancestor = joined;
        loop {
            if let Ok(metadata) = fs::symlink_metadata(ancestor) {
                let canonical = match fs::canonicalize(ancestor) {
                    Ok(canonical) => canonical,
                    Err(e) if e.kind() == io::ErrorKind::NotFound && metadata.file_type().is_symlink() => {
                        return Err(FsError::invalid_path(shown, "dangling symbolic link"));
                    }
                    Err(e) => return Err(FsError::io(shown, e)),
                };
                if !canonical.starts_with(&self.root) {
                    debug!(path = %shown.display(), "Rejected path resolving outside root");
                    return Err(FsError::invalid_path(shown, "resolves outside the root directory"));
                }
                return Ok(());
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Ok(()),
            }
        }
    }

    fn resolve_not_root(&self, path: &Path) -> FsResult<PathBuf> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(FsError::invalid_path(path, "operation not allowed on the root directory"));
        }
        Ok(resolved)
    }

    /// The root-relative form of a host path below the root.
    fn shown(&self, host: &Path) -> PathBuf {
        match host.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => host.file_name().map(PathBuf::from).unwrap_or_default(),
        }
    }

    /// Replace host paths in delegate errors with the caller's path.
    fn rebase(shown: &Path, err: FsError) -> FsError {
        match err {
            FsError::Io { source, .. } => FsError::io(shown, source),
            FsError::InvalidPath { reason, .. } => FsError::invalid_path(shown, reason),
            other => other,
        }
    }
}

impl FileSystem for RelativeFileSystem {
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<FileHandle> {
        let resolved = self.resolve(path)?;
        self.delegate
            .open(&resolved, flags)
            .map_err(|e| Self::rebase(path, e))
    }

    fn stat(&self, path: &Path) -> FsResult<FileInfo> {
        let resolved = self.resolve(path)?;
        self.delegate.stat(&resolved).map_err(|e| Self::rebase(path, e))
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        let resolved = self.resolve_not_root(path)?;
        self.delegate.remove(&resolved).map_err(|e| Self::rebase(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let source = self.resolve_not_root(from)?;
        let target = self.resolve_not_root(to)?;
        self.delegate
            .rename(&source, &target)
            .map_err(|e| Self::rebase(from, e))
    }

    fn exist(&self, path: &Path) -> bool {
        match self.resolve(path) {
            Ok(resolved) => self.delegate.exist(&resolved),
            Err(_) => false,
        }
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        let resolved = self.resolve_not_root(path)?;
        self.delegate
            .mkdir(&resolved, mode)
            .map_err(|e| Self::rebase(path, e))
    }

    fn walk(&self, root: &Path, visit: &mut WalkVisitor<'_>) -> FsResult<()> {
        let start = self.resolve(root)?;
        self.delegate.walk(&start, &mut |host, info| {
            let shown = self.shown(host);
            match info {
                Ok(info) if info.is_symlink => match self.check_canonical(&shown, host) {
                    Ok(()) => visit(&shown, Ok(info)),
                    Err(e) => match visit(&shown, Err(e))? {
                        Visit::Stop => Ok(Visit::Stop),
                        _ => Ok(Visit::SkipDir),
                    },
                },
                Ok(info) => visit(&shown, Ok(info)),
                Err(e) => visit(&shown, Err(Self::rebase(&shown, e))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn confined() -> (tempfile::TempDir, RelativeFileSystem) {
        let dir = tempfile::tempdir().unwrap();
        let fs = RelativeFileSystem::native(dir.path()).unwrap();
        (dir, fs)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/./b/../c")).unwrap(), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("/abs/file")).unwrap(), PathBuf::from("abs/file"));
        assert_eq!(normalize(Path::new("")).unwrap(), PathBuf::new());
        assert!(normalize(Path::new("../etc/passwd")).unwrap_err().is_invalid_path());
        assert!(normalize(Path::new("a/../../etc/passwd")).unwrap_err().is_invalid_path());
    }

    #[test]
    fn test_escape_attempts_rejected() {
        let (_dir, fs) = confined();
        for path in ["../etc/passwd", "a/../../etc/passwd"] {
            let err = fs.open(Path::new(path), OpenFlags::read_only()).unwrap_err();
            assert!(err.is_invalid_path(), "{path}: {err}");
            assert!(!fs.exist(Path::new(path)));
        }
    }

    #[test]
    fn test_absolute_paths_are_root_relative() {
        let (dir, fs) = confined();
        let mut file = fs.open(Path::new("/inside.txt"), OpenFlags::write_truncate()).unwrap();
        file.write_all(b"data").unwrap();
        drop(file);

        assert!(dir.path().join("inside.txt").exists());
        let mut text = String::new();
        fs.open(Path::new("x/../inside.txt"), OpenFlags::read_only())
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "data");
    }

    #[test]
    fn test_rename_checks_both_sides() {
        let (dir, fs) = confined();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();

        let err = fs.rename(Path::new("a.txt"), Path::new("../stolen.txt")).unwrap_err();
        assert!(err.is_invalid_path());
        assert!(dir.path().join("a.txt").exists());

        fs.rename(Path::new("a.txt"), Path::new("b.txt")).unwrap();
        assert!(fs.exist(Path::new("b.txt")));
        assert!(!fs.exist(Path::new("a.txt")));
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let (dir, fs) = confined();
        assert!(fs.remove(Path::new(".")).unwrap_err().is_invalid_path());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_errors_do_not_leak_host_paths() {
        let (dir, fs) = confined();
        let err = fs.stat(Path::new("missing.txt")).unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.to_string().contains(&*dir.path().to_string_lossy()));
    }

    #[test]
    fn test_walk_reports_relative_paths() {
        let (dir, fs) = confined();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f.txt"), "x").unwrap();

        let mut seen = Vec::new();
        fs.walk(Path::new("/"), &mut |path, info| {
            info?;
            seen.push(path.to_string_lossy().replace('\\', "/"));
            Ok(Visit::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![".", "sub", "sub/f.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "s").unwrap();
        let (dir, fs) = confined();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("out")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("dangling")).unwrap();

        assert!(fs.open(Path::new("out/secret"), OpenFlags::read_only()).unwrap_err().is_invalid_path());
        assert!(fs.open(Path::new("out/new"), OpenFlags::write_truncate()).unwrap_err().is_invalid_path());
        assert!(fs.open(Path::new("dangling"), OpenFlags::write_truncate()).unwrap_err().is_invalid_path());
        assert!(!fs.exist(Path::new("out")));

        let mut rejected = Vec::new();
        let mut visited = Vec::new();
        fs.walk(Path::new(""), &mut |path, info| {
            match info {
                Ok(_) => visited.push(path.to_path_buf()),
                Err(e) => {
                    assert!(e.is_invalid_path());
                    rejected.push(path.to_path_buf());
                }
            }
            Ok(Visit::Continue)
        })
        .unwrap();
        assert_eq!(rejected, vec![PathBuf::from("dangling"), PathBuf::from("out")]);
        assert!(visited.iter().all(|p| !p.starts_with("out/")));
    }
}
