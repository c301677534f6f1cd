//! Hardening of a fresh interpreter.
//!
//! A guest sees:
//!
//! - the `table`, `string`, `math`, `utf8` and `coroutine` libraries, behind
//!   read-only proxies
//! - the base functions minus `rawset`, `dofile`, `loadfile` and
//!   `collectgarbage`
//! - `print`, routed to `tracing` under the `warden::script` target
//! - `load`, restricted to source text and defaulting to the run's
//!   environment
//! - `require`, which only knows catalog namespaces
//!
//! Every run gets its own environment table whose reads fall through to the
//! hardened globals, so nothing a script defines survives the run.

use mlua::{Function, Lua, LuaOptions, MultiValue, StdLib, Table, Value};

/// Tracing target of guest `print` output.
pub const SCRIPT_TARGET: &str = "warden::script";

/// Globals removed from every context.
pub const REMOVED_GLOBALS: &[&str] = &["rawset", "dofile", "loadfile", "collectgarbage"];

const LIBRARIES: &[&str] = &["table", "string", "math", "utf8", "coroutine"];

const BIND_LOAD_KEY: &str = "warden.bind_load";

/// Create an interpreter with only the pure standard libraries loaded.
pub fn new_interpreter() -> mlua::Result<Lua> {
    Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE,
        LuaOptions::default(),
    )
}

/// Wrap `table` in a proxy that rejects writes and hides its metatable.
pub fn read_only(lua: &Lua, table: Table) -> mlua::Result<Table> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;

    let target = table.clone();
    meta.set(
        "__pairs",
        lua.create_function(move |lua, _: Value| {
            let next: Function = lua.globals().get("next")?;
            Ok((next, target.clone(), Value::Nil))
        })?,
    )?;
    let target = table.clone();
    meta.set("__len", lua.create_function(move |_, _: Value| Ok(target.raw_len()))?)?;
    meta.set("__index", table)?;
    meta.set(
        "__newindex",
        lua.create_function(|_, (_, key, _): (Value, Value, Value)| -> mlua::Result<()> {
            let key = match key {
                Value::String(s) => s.to_string_lossy().to_string(),
                other => other.type_name().to_string(),
            };
            Err(mlua::Error::runtime(format!(
                "attempt to modify read-only table (key '{key}')"
            )))
        })?,
    )?;
    meta.set("__metatable", false)?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

fn print_function(lua: &Lua) -> mlua::Result<Function> {
    lua.create_function(|lua, args: MultiValue| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut line = String::new();
        for (i, value) in args.into_iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&tostring.call::<mlua::String>(value)?.to_string_lossy());
        }
        tracing::info!(target: SCRIPT_TARGET, "{line}");
        Ok(())
    })
}

/// Harden the globals of a fresh interpreter.
///
/// Must run before any guest code and before the catalog is bound.
pub fn harden(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.raw_remove(*name)?;
    }
    for name in LIBRARIES {
        if let Some(library) = globals.get::<Option<Table>>(*name)? {
            globals.raw_set(*name, read_only(lua, library)?)?;
        }
    }
    globals.raw_set("print", print_function(lua)?)?;

    // `load` is rebound per run so loaded chunks see the run's environment.
    let bind_load: Function = lua
        .load(
            r#"
            local load = ...
            return function(run_env)
                return function(chunk, name, _, env)
                    if env == nil then env = run_env end
                    return load(chunk, name, "t", env)
                end
            end
        "#,
        )
        .set_name("=warden:load")
        .call(globals.get::<Function>("load")?)?;
    lua.set_named_registry_value(BIND_LOAD_KEY, bind_load)?;
    globals.raw_remove("load")?;

    // String values share one metatable whose __index is the real library.
    lua.load(r#"getmetatable("").__metatable = false"#)
        .set_name("=warden:harden")
        .exec()?;
    Ok(())
}

/// Create the environment of one run over `globals`.
///
/// Reads fall through to `globals`; writes stay in the returned table;
/// `_G` and `_ENV` inside the run both denote it.
pub fn run_environment(lua: &Lua, globals: &Table) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", globals.clone())?;
    meta.set("__metatable", false)?;
    env.set_metatable(Some(meta));
    env.raw_set("_G", env.clone())?;
    let bind_load: Function = lua.named_registry_value(BIND_LOAD_KEY)?;
    env.raw_set("load", bind_load.call::<Function>(env.clone())?)?;
    Ok(env)
}
