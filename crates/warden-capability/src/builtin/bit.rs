//! `bit` module: bitwise helpers on 64-bit integers.

use mlua::{Lua, Table, Variadic};

use crate::capability::CapabilityModule;

/// Provides `band`, `bor`, `bxor`, `bnot`, `lshift` and `rshift`.
///
/// Shifts are logical; counts outside `0..64` yield zero.
#[derive(Debug, Default)]
pub struct BitModule;

impl BitModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

fn fold(values: Variadic<i64>, init: i64, op: fn(i64, i64) -> i64) -> i64 {
    values.iter().copied().fold(init, op)
}

fn shift_left(value: i64, count: i64) -> i64 {
    match u32::try_from(count) {
        Ok(n) if n < 64 => ((value as u64) << n) as i64,
        _ => 0,
    }
}

fn shift_right(value: i64, count: i64) -> i64 {
    match u32::try_from(count) {
        Ok(n) if n < 64 => ((value as u64) >> n) as i64,
        _ => 0,
    }
}

impl CapabilityModule for BitModule {
    fn name(&self) -> &str {
        "Bit"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "band",
            lua.create_function(|_, v: Variadic<i64>| Ok(fold(v, -1, |a, b| a & b)))?,
        )?;
        module.set(
            "bor",
            lua.create_function(|_, v: Variadic<i64>| Ok(fold(v, 0, |a, b| a | b)))?,
        )?;
        module.set(
            "bxor",
            lua.create_function(|_, v: Variadic<i64>| Ok(fold(v, 0, |a, b| a ^ b)))?,
        )?;
        module.set("bnot", lua.create_function(|_, v: i64| Ok(!v))?)?;
        module.set(
            "lshift",
            lua.create_function(|_, (v, n): (i64, i64)| Ok(shift_left(v, n)))?,
        )?;
        module.set(
            "rshift",
            lua.create_function(|_, (v, n): (i64, i64)| Ok(shift_right(v, n)))?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(1, 4), 16);
        assert_eq!(shift_right(-1, 60), 0xF);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_right(8, -1), 0);
    }

    #[test]
    fn test_bit_from_lua() {
        let lua = Lua::new();
        let module = BitModule::new().install(&lua).unwrap();
        lua.globals().set("bit", module).unwrap();

        let (and, or, xor): (i64, i64, i64) = lua
            .load("return bit.band(0xF0, 0x3C), bit.bor(1, 2, 4), bit.bxor(5, 1)")
            .eval()
            .unwrap();
        assert_eq!((and, or, xor), (0x30, 7, 4));
    }
}
