//! Direct access to the host filesystem.

use std::fs::{self, DirBuilder, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{FsError, FsResult};
use crate::filesystem::{FileHandle, FileInfo, FileStream, FileSystem, OpenFlags, Visit, WalkVisitor};

/// Permission bits for files created by [`NativeFileSystem::open`].
pub const DEFAULT_FILE_MODE: u32 = 0o644;

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// A file opened by [`NativeFileSystem`].
#[derive(Debug)]
pub struct NativeFile {
    file: File,
    path: PathBuf,
}

impl Read for NativeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for NativeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for NativeFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl FileStream for NativeFile {
    fn stat(&self) -> FsResult<FileInfo> {
        let metadata = self.file.metadata().map_err(|e| FsError::io(&self.path, e))?;
        Ok(FileInfo::from_metadata(file_name(&self.path), &metadata))
    }
}

/// The host filesystem, unconfined.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileSystem;

impl NativeFileSystem {
    /// Create the filesystem.
    pub fn new() -> Self {
        Self
    }

    fn walk_path(&self, path: &Path, visit: &mut WalkVisitor<'_>) -> FsResult<Visit> {
        let info = fs::symlink_metadata(path)
            .map(|m| FileInfo::from_metadata(file_name(path), &m))
            .map_err(|e| FsError::io(path, e));
        let is_dir = matches!(&info, Ok(info) if info.is_dir);

        match visit(path, info)? {
            Visit::Stop => return Ok(Visit::Stop),
            Visit::SkipDir => return Ok(Visit::Continue),
            Visit::Continue if !is_dir => return Ok(Visit::Continue),
            Visit::Continue => {}
        }

        let mut children = match fs::read_dir(path).and_then(|entries| {
            entries
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<Vec<_>>>()
        }) {
            Ok(children) => children,
            Err(e) => {
                return match visit(path, Err(FsError::io(path, e)))? {
                    Visit::Stop => Ok(Visit::Stop),
                    _ => Ok(Visit::Continue),
                };
            }
        };
        children.sort();

        for child in children {
            if self.walk_path(&child, visit)? == Visit::Stop {
                return Ok(Visit::Stop);
            }
        }
        Ok(Visit::Continue)
    }
}

impl FileSystem for NativeFileSystem {
    fn open(&self, path: &Path, flags: OpenFlags) -> FsResult<FileHandle> {
        let mut options = flags.to_options();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(DEFAULT_FILE_MODE);
        }
        let file = options.open(path).map_err(|e| FsError::io(path, e))?;
        trace!(path = %path.display(), ?flags, "Opened file");
        Ok(Box::new(NativeFile {
            file,
            path: path.to_path_buf(),
        }))
    }

    fn stat(&self, path: &Path) -> FsResult<FileInfo> {
        let metadata = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
        Ok(FileInfo::from_metadata(file_name(path), &metadata))
    }

    fn remove(&self, path: &Path) -> FsResult<()> {
        let metadata = fs::symlink_metadata(path).map_err(|e| FsError::io(path, e))?;
        let removed = if metadata.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|e| FsError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        fs::rename(from, to).map_err(|e| FsError::io(from, e))
    }

    fn exist(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn mkdir(&self, path: &Path, mode: u32) -> FsResult<()> {
        let mut builder = DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path).map_err(|e| FsError::io(path, e))
    }

    fn walk(&self, root: &Path, visit: &mut WalkVisitor<'_>) -> FsResult<()> {
        self.walk_path(root, visit).map(|_| ())
    }
}
