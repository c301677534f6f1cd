//! `buffer` module: growable byte buffers.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mlua::{ExternalResult, Lua, MetaMethod, Table, UserData, UserDataMethods};

use crate::capability::CapabilityModule;

/// A growable byte buffer exposed to guests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Create a buffer holding `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// The buffered bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Resolve Lua-style `sub(i, j)` bounds (1-based, inclusive, negative from
/// the end) into a byte range.
fn lua_range(len: usize, i: i64, j: Option<i64>) -> std::ops::Range<usize> {
    let len_i = len as i64;
    let norm = |v: i64| if v < 0 { len_i + v + 1 } else { v };
    let start = norm(i).max(1);
    let end = norm(j.unwrap_or(-1)).min(len_i);
    if start > end {
        return 0..0;
    }
    (start - 1) as usize..end as usize
}

impl UserData for Buffer {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method_mut("append", |_, this, data: mlua::String| {
            this.data.extend_from_slice(&data.as_bytes());
            Ok(this.data.len())
        });
        methods.add_method("len", |_, this, ()| Ok(this.data.len()));
        methods.add_method("bytes", |lua, this, ()| lua.create_string(&this.data));
        methods.add_method("sub", |lua, this, (i, j): (i64, Option<i64>)| {
            let range = lua_range(this.data.len(), i, j);
            lua.create_string(&this.data[range])
        });
        methods.add_method("hex", |_, this, ()| Ok(hex::encode(&this.data)));
        methods.add_method("base64", |_, this, ()| Ok(STANDARD.encode(&this.data)));
        methods.add_method_mut("clear", |_, this, ()| {
            this.data.clear();
            Ok(())
        });

        methods.add_meta_method(MetaMethod::Len, |_, this, ()| Ok(this.data.len()));
        methods.add_meta_method(MetaMethod::ToString, |lua, this, ()| {
            lua.create_string(&this.data)
        });
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::UserDataRef<Buffer>| {
            Ok(this.data == other.data)
        });
    }
}

/// Provides `buffer.new`, `buffer.from_hex` and `buffer.from_base64`.
#[derive(Debug, Default)]
pub struct BufferModule;

impl BufferModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityModule for BufferModule {
    fn name(&self) -> &str {
        "Buffer"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "new",
            lua.create_function(|_, data: Option<mlua::String>| {
                Ok(data
                    .map(|d| Buffer::from_bytes(d.as_bytes().to_vec()))
                    .unwrap_or_default())
            })?,
        )?;
        module.set(
            "from_hex",
            lua.create_function(|_, text: String| {
                hex::decode(text.trim()).into_lua_err().map(Buffer::from_bytes)
            })?,
        )?;
        module.set(
            "from_base64",
            lua.create_function(|_, text: String| {
                STANDARD
                    .decode(text.trim())
                    .into_lua_err()
                    .map(Buffer::from_bytes)
            })?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_range() {
        assert_eq!(lua_range(5, 1, None), 0..5);
        assert_eq!(lua_range(5, 2, Some(3)), 1..3);
        assert_eq!(lua_range(5, -2, None), 3..5);
        assert_eq!(lua_range(5, 4, Some(2)), 0..0);
        assert_eq!(lua_range(5, 0, Some(100)), 0..5);
    }

    #[test]
    fn test_buffer_from_lua() {
        let lua = Lua::new();
        let module = BufferModule::new().install(&lua).unwrap();
        lua.globals().set("buffer", module).unwrap();

        let (len, hex, sub): (usize, String, String) = lua
            .load(
                r#"
                local b = buffer.new("ab")
                b:append("cd")
                return #b, b:hex(), b:sub(2, 3)
            "#,
            )
            .eval()
            .unwrap();

        assert_eq!(len, 4);
        assert_eq!(hex, "61626364");
        assert_eq!(sub, "bc");
    }

    #[test]
    fn test_buffer_decoders() {
        let lua = Lua::new();
        let module = BufferModule::new().install(&lua).unwrap();
        lua.globals().set("buffer", module).unwrap();

        let same: bool = lua
            .load(r#"return buffer.from_hex("6869") == buffer.from_base64("aGk=")"#)
            .eval()
            .unwrap();
        assert!(same);
        assert!(lua.load(r#"buffer.from_hex("zz")"#).exec().is_err());
    }
}
