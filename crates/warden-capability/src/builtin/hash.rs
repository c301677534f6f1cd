//! `hash.crc32` and `hash.crc64` modules.

use crc::{CRC_32_ISO_HDLC, CRC_64_XZ, Crc};
use mlua::{Lua, Table};

use crate::capability::CapabilityModule;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Checksum widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcWidth {
    /// CRC-32 (IEEE).
    Crc32,
    /// CRC-64 (ECMA-182, reflected).
    Crc64,
}

impl CrcWidth {
    /// Compute the checksum of `data`.
    pub fn checksum(self, data: &[u8]) -> u64 {
        match self {
            Self::Crc32 => u64::from(CRC32.checksum(data)),
            Self::Crc64 => CRC64.checksum(data),
        }
    }

    fn hex_digits(self) -> usize {
        match self {
            Self::Crc32 => 8,
            Self::Crc64 => 16,
        }
    }
}

/// Provides `checksum(data)` (an integer; CRC-64 values wrap into Lua's
/// signed range) and `hex(data)`.
#[derive(Debug)]
pub struct CrcModule {
    width: CrcWidth,
}

impl CrcModule {
    /// Create a module for `width`.
    pub fn new(width: CrcWidth) -> Self {
        Self { width }
    }
}

impl CapabilityModule for CrcModule {
    fn name(&self) -> &str {
        match self.width {
            CrcWidth::Crc32 => "CRC-32",
            CrcWidth::Crc64 => "CRC-64",
        }
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        let width = self.width;
        module.set(
            "checksum",
            lua.create_function(move |_, data: mlua::String| {
                Ok(width.checksum(&data.as_bytes()) as i64)
            })?,
        )?;
        module.set(
            "hex",
            lua.create_function(move |_, data: mlua::String| {
                Ok(format!(
                    "{:0width$x}",
                    width.checksum(&data.as_bytes()),
                    width = width.hex_digits()
                ))
            })?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_values() {
        // Standard "123456789" check values of each catalogue entry.
        assert_eq!(CrcWidth::Crc32.checksum(b"123456789"), 0xcbf43926);
        assert_eq!(CrcWidth::Crc64.checksum(b"123456789"), 0x995dc9bbdf1939fa);
    }

    #[test]
    fn test_crc_module_hex() {
        let lua = Lua::new();
        lua.globals()
            .set("crc32", CrcModule::new(CrcWidth::Crc32).install(&lua).unwrap())
            .unwrap();

        let (value, text): (i64, String) = lua
            .load(r#"return crc32.checksum("123456789"), crc32.hex("123456789")"#)
            .eval()
            .unwrap();
        assert_eq!(value, 0xcbf43926);
        assert_eq!(text, "cbf43926");
    }
}
