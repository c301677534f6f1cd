//! `io.reader` and `io.writer` modules: in-memory byte streams.

use mlua::{Lua, MultiValue, Table, UserData, UserDataMethods, Variadic};

use crate::capability::CapabilityModule;

/// A cursor over an immutable byte string.
#[derive(Debug, Default)]
pub struct StringReader {
    data: Vec<u8>,
    pos: usize,
}

impl StringReader {
    /// Create a reader over `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    fn take(&mut self, n: usize) -> &[u8] {
        let end = self.pos.saturating_add(n).min(self.data.len());
        let chunk = &self.data[self.pos..end];
        self.pos = end;
        chunk
    }

    fn take_line(&mut self) -> Option<&[u8]> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        self.pos += consumed;
        Some(line)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl UserData for StringReader {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("read", |lua, this, n: usize| {
            if this.remaining() == 0 {
                return Ok(mlua::Value::Nil);
            }
            lua.create_string(this.take(n)).map(mlua::Value::String)
        });
        methods.add_method_mut("read_all", |lua, this, ()| {
            let n = this.remaining();
            lua.create_string(this.take(n))
        });
        methods.add_method_mut("read_line", |lua, this, ()| match this.take_line() {
            Some(line) => lua.create_string(line).map(mlua::Value::String),
            None => Ok(mlua::Value::Nil),
        });
        methods.add_method("remaining", |_, this, ()| Ok(this.remaining()));
    }
}

/// An append-only byte sink.
#[derive(Debug, Default)]
pub struct StringWriter {
    data: Vec<u8>,
}

impl UserData for StringWriter {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("write", |_, this, parts: Variadic<mlua::String>| {
            for part in parts.iter() {
                this.data.extend_from_slice(&part.as_bytes());
            }
            Ok(this.data.len())
        });
        methods.add_method("string", |lua, this, ()| lua.create_string(&this.data));
        methods.add_method("len", |_, this, ()| Ok(this.data.len()));
    }
}

/// Provides `io.reader.new(string)`.
#[derive(Debug, Default)]
pub struct ReaderModule;

impl ReaderModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityModule for ReaderModule {
    fn name(&self) -> &str {
        "Reader"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "new",
            lua.create_function(|_, data: mlua::String| Ok(StringReader::new(data.as_bytes().to_vec())))?,
        )?;
        Ok(module)
    }
}

/// Provides `io.writer.new()`.
#[derive(Debug, Default)]
pub struct WriterModule;

impl WriterModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityModule for WriterModule {
    fn name(&self) -> &str {
        "Writer"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "new",
            lua.create_function(|_, _: MultiValue| Ok(StringWriter::default()))?,
        )?;
        Ok(module)
    }
}
