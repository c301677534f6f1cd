//! `fs` and `fs.utils` capability modules.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use mlua::{ExternalResult, Function, Lua, Table, UserData, UserDataMethods, Value};
use parking_lot::Mutex;
use tracing::debug;
use warden_capability::CapabilityModule;

use crate::error::FsError;
use crate::filesystem::{FileHandle, FileInfo, OpenFlags, SharedFileSystem, Visit};

const DEFAULT_READ_SIZE: usize = 8192;
const MAX_READ_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_DIR_MODE: u32 = 0o755;

fn info_table(lua: &Lua, info: &FileInfo) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("name", info.name.as_str())?;
    table.set("size", info.size)?;
    table.set("is_dir", info.is_dir)?;
    table.set("is_symlink", info.is_symlink)?;
    table.set("mode", info.mode)?;
    table.set("modified", info.modified_unix())?;
    Ok(table)
}

/// An open file handed to guest code.
#[derive(Debug)]
pub struct LuaFile {
    file: Mutex<Option<FileHandle>>,
    path: PathBuf,
}

impl LuaFile {
    fn new(file: FileHandle, path: PathBuf) -> Self {
        Self {
            file: Mutex::new(Some(file)),
            path,
        }
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut FileHandle) -> io::Result<T>) -> mlua::Result<T> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| mlua::Error::runtime(format!("file '{}' is closed", self.path.display())))?;
        f(file).map_err(|e| FsError::io(&self.path, e)).into_lua_err()
    }
}

impl UserData for LuaFile {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("read", |lua, this, n: Option<usize>| {
            let n = n.unwrap_or(DEFAULT_READ_SIZE).clamp(1, MAX_READ_SIZE);
            let mut buf = vec![0u8; n];
            let read = this.with_file(|f| f.read(&mut buf))?;
            if read == 0 {
                return Ok(Value::Nil);
            }
            lua.create_string(&buf[..read]).map(Value::String)
        });
        methods.add_method("read_all", |lua, this, ()| {
            let mut data = Vec::new();
            this.with_file(|f| f.read_to_end(&mut data))?;
            lua.create_string(data)
        });
        methods.add_method("write", |_, this, data: mlua::String| {
            let bytes = data.as_bytes();
            this.with_file(|f| f.write_all(&bytes))?;
            Ok(bytes.len())
        });
        methods.add_method("seek", |_, this, (whence, offset): (Option<String>, Option<i64>)| {
            let offset = offset.unwrap_or(0);
            let position = match whence.as_deref().unwrap_or("cur") {
                "set" => SeekFrom::Start(u64::try_from(offset).map_err(|_| {
                    mlua::Error::runtime("seek: negative offset from start")
                })?),
                "cur" => SeekFrom::Current(offset),
                "end" => SeekFrom::End(offset),
                other => return Err(mlua::Error::runtime(format!("seek: invalid whence '{other}'"))),
            };
            this.with_file(|f| f.seek(position))
        });
        methods.add_method("stat", |lua, this, ()| {
            let guard = this.file.lock();
            let file = guard
                .as_ref()
                .ok_or_else(|| mlua::Error::runtime("file is closed"))?;
            let info = file.stat().into_lua_err()?;
            info_table(lua, &info)
        });
        methods.add_method("close", |_, this, ()| {
            let Some(mut file) = this.file.lock().take() else {
                return Ok(false);
            };
            file.flush().map_err(|e| FsError::io(&this.path, e)).into_lua_err()?;
            Ok(true)
        });
    }
}

/// Provides `open`, `stat`, `remove`, `rename`, `exist`, `mkdir` and `walk`.
#[derive(Debug, Clone)]
pub struct FsModule {
    fs: SharedFileSystem,
}

impl FsModule {
    /// Create the module over `fs`.
    pub fn new(fs: SharedFileSystem) -> Self {
        Self { fs }
    }
}

/// Map a walk callback's return value to a [`Visit`].
///
/// `nil` and `true` continue, `false` stops, `"skip"` skips a directory.
fn visit_from_lua(value: Value) -> mlua::Result<Visit> {
    match value {
        Value::Nil | Value::Boolean(true) => Ok(Visit::Continue),
        Value::Boolean(false) => Ok(Visit::Stop),
        Value::String(s) if s.to_string_lossy() == "skip" => Ok(Visit::SkipDir),
        other => Err(mlua::Error::runtime(format!(
            "walk: callback returned unexpected {}",
            other.type_name()
        ))),
    }
}

impl CapabilityModule for FsModule {
    fn name(&self) -> &str {
        "Filesystem"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;

        let fs = self.fs.clone();
        module.set(
            "open",
            lua.create_function(move |_, (path, mode): (String, Option<String>)| {
                let flags: OpenFlags = mode.as_deref().unwrap_or("r").parse().into_lua_err()?;
                let path = PathBuf::from(path);
                let file = fs.open(&path, flags).into_lua_err()?;
                debug!(path = %path.display(), ?flags, "Guest opened file");
                Ok(LuaFile::new(file, path))
            })?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "stat",
            lua.create_function(move |lua, path: String| {
                let info = fs.stat(Path::new(&path)).into_lua_err()?;
                info_table(lua, &info)
            })?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "remove",
            lua.create_function(move |_, path: String| fs.remove(Path::new(&path)).into_lua_err())?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "rename",
            lua.create_function(move |_, (from, to): (String, String)| {
                fs.rename(Path::new(&from), Path::new(&to)).into_lua_err()
            })?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "exist",
            lua.create_function(move |_, path: String| Ok(fs.exist(Path::new(&path))))?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "mkdir",
            lua.create_function(move |_, (path, mode): (String, Option<u32>)| {
                fs.mkdir(Path::new(&path), mode.unwrap_or(DEFAULT_DIR_MODE))
                    .into_lua_err()
            })?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "walk",
            lua.create_function(move |lua, (root, callback): (String, Function)| {
                let mut guest_error = None;
                let walked = fs.walk(Path::new(&root), &mut |path, info| {
                    match visit_entry(lua, &callback, path, info) {
                        Ok(visit) => Ok(visit),
                        Err(e) => {
                            guest_error = Some(e);
                            Ok(Visit::Stop)
                        }
                    }
                });
                if let Some(e) = guest_error {
                    return Err(e);
                }
                walked.into_lua_err()
            })?,
        )?;

        Ok(module)
    }
}

/// Call the guest's walk callback as `fn(path, info, err)`.
fn visit_entry(
    lua: &Lua,
    callback: &Function,
    path: &Path,
    info: Result<FileInfo, FsError>,
) -> mlua::Result<Visit> {
    let shown = path.to_string_lossy().into_owned();
    let result = match info {
        Ok(info) => callback.call::<Value>((shown, info_table(lua, &info)?, Value::Nil))?,
        Err(e) => callback.call::<Value>((shown, Value::Nil, e.to_string()))?,
    };
    visit_from_lua(result)
}

/// Provides whole-file helpers: `read_file`, `write_file`, `append_file`,
/// `copy` and `list`.
#[derive(Debug, Clone)]
pub struct FsUtilsModule {
    fs: SharedFileSystem,
}

impl FsUtilsModule {
    /// Create the module over `fs`.
    pub fn new(fs: SharedFileSystem) -> Self {
        Self { fs }
    }
}

impl CapabilityModule for FsUtilsModule {
    fn name(&self) -> &str {
        "Filesystem utilities"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;

        let fs = self.fs.clone();
        module.set(
            "read_file",
            lua.create_function(move |lua, path: String| {
                let path = PathBuf::from(path);
                let mut file = fs.open(&path, OpenFlags::read_only()).into_lua_err()?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)
                    .map_err(|e| FsError::io(&path, e))
                    .into_lua_err()?;
                lua.create_string(data)
            })?,
        )?;

        for (name, flags) in [
            ("write_file", OpenFlags::write_truncate()),
            ("append_file", OpenFlags::append()),
        ] {
            let fs = self.fs.clone();
            module.set(
                name,
                lua.create_function(move |_, (path, data): (String, mlua::String)| {
                    let path = PathBuf::from(path);
                    let bytes = data.as_bytes();
                    let mut file = fs.open(&path, flags).into_lua_err()?;
                    file.write_all(&bytes)
                        .and_then(|()| file.flush())
                        .map_err(|e| FsError::io(&path, e))
                        .into_lua_err()?;
                    Ok(bytes.len())
                })?,
            )?;
        }

        let fs = self.fs.clone();
        module.set(
            "copy",
            lua.create_function(move |_, (from, to): (String, String)| {
                let (from, to) = (PathBuf::from(from), PathBuf::from(to));
                let mut source = fs.open(&from, OpenFlags::read_only()).into_lua_err()?;
                let mut target = fs.open(&to, OpenFlags::write_truncate()).into_lua_err()?;
                io::copy(&mut source, &mut target)
                    .map_err(|e| FsError::io(&to, e))
                    .into_lua_err()
            })?,
        )?;

        let fs = self.fs.clone();
        module.set(
            "list",
            lua.create_function(move |lua, dir: Option<String>| {
                let dir = PathBuf::from(dir.unwrap_or_else(|| ".".into()));
                let mut names = Vec::new();
                let mut at_root = true;
                fs.walk(&dir, &mut |_, info| {
                    if std::mem::take(&mut at_root) {
                        info?;
                        return Ok(Visit::Continue);
                    }
                    // Entries the filesystem refuses to describe are left out.
                    let Ok(info) = info else {
                        return Ok(Visit::Continue);
                    };
                    names.push(info.name);
                    Ok(if info.is_dir { Visit::SkipDir } else { Visit::Continue })
                })
                .into_lua_err()?;
                lua.create_sequence_from(names)
            })?,
        )?;

        Ok(module)
    }
}
