//! `rand` module: random numbers from the thread-local CSPRNG.

use mlua::{Lua, Table};
use rand::{Rng, RngCore};

use crate::capability::CapabilityModule;

/// Upper bound on `rand.bytes` / `rand.hex` requests.
const MAX_RANDOM_BYTES: usize = 1024 * 1024;

fn random_bytes(n: usize) -> mlua::Result<Vec<u8>> {
    if n > MAX_RANDOM_BYTES {
        return Err(mlua::Error::runtime(format!(
            "at most {MAX_RANDOM_BYTES} random bytes per call"
        )));
    }
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    Ok(buf)
}

/// Provides `rand.int`, `rand.float`, `rand.bytes` and `rand.hex`.
#[derive(Debug, Default)]
pub struct RandModule;

impl RandModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityModule for RandModule {
    fn name(&self) -> &str {
        "Rand"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "int",
            lua.create_function(|_, (lo, hi): (i64, i64)| {
                if lo > hi {
                    return Err(mlua::Error::runtime("rand.int: lower bound above upper bound"));
                }
                Ok(rand::thread_rng().gen_range(lo..=hi))
            })?,
        )?;
        module.set(
            "float",
            lua.create_function(|_, ()| Ok(rand::thread_rng().gen_range(0.0..1.0f64)))?,
        )?;
        module.set(
            "bytes",
            lua.create_function(|lua, n: usize| lua.create_string(random_bytes(n)?))?,
        )?;
        module.set(
            "hex",
            lua.create_function(|_, n: usize| Ok(hex::encode(random_bytes(n)?)))?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_ranges() {
        let lua = Lua::new();
        lua.globals()
            .set("rand", RandModule::new().install(&lua).unwrap())
            .unwrap();

        let ok: bool = lua
            .load(
                r#"
                for _ = 1, 100 do
                    local v = rand.int(3, 5)
                    if v < 3 or v > 5 then return false end
                end
                return #rand.bytes(16) == 16 and #rand.hex(4) == 8
            "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
        assert!(lua.load("rand.int(5, 3)").exec().is_err());
    }
}
