//! `regexp` module backed by the `regex` crate.
//!
//! Patterns use `regex` syntax, not Lua patterns. Compiled programs are
//! size-limited so a script cannot build an arbitrarily large automaton.

use mlua::{ExternalResult, Lua, Table, UserData, UserDataMethods, Value};
use regex::{Regex, RegexBuilder};

use crate::capability::CapabilityModule;

/// Compiled-program size limit handed to [`RegexBuilder::size_limit`].
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// A compiled expression exposed to guests.
#[derive(Debug, Clone)]
pub struct Regexp(Regex);

impl Regexp {
    /// Compile `pattern`.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map(Self)
    }

    fn captures(&self, lua: &Lua, haystack: &str) -> mlua::Result<Value> {
        let Some(caps) = self.0.captures(haystack) else {
            return Ok(Value::Nil);
        };
        let table = lua.create_table()?;
        for (index, group) in caps.iter().enumerate() {
            if let Some(m) = group {
                table.set(index, m.as_str())?;
            }
        }
        for name in self.0.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                table.set(name, m.as_str())?;
            }
        }
        Ok(Value::Table(table))
    }
}

impl UserData for Regexp {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("match", |_, this, s: String| Ok(this.0.is_match(&s)));

        // Returns the matched text plus 1-based inclusive start/end positions.
        methods.add_method("find", |_, this, s: String| {
            Ok(match this.0.find(&s) {
                Some(m) => (Some(m.as_str().to_owned()), Some(m.start() + 1), Some(m.end())),
                None => (None, None, None),
            })
        });

        methods.add_method("find_all", |lua, this, (s, limit): (String, Option<usize>)| {
            let limit = limit.unwrap_or(usize::MAX);
            lua.create_sequence_from(this.0.find_iter(&s).take(limit).map(|m| m.as_str().to_owned()))
        });

        methods.add_method("captures", |lua, this, s: String| this.captures(lua, &s));

        methods.add_method(
            "replace",
            |_, this, (s, replacement, limit): (String, String, Option<usize>)| {
                Ok(this
                    .0
                    .replacen(&s, limit.unwrap_or(0), replacement.as_str())
                    .into_owned())
            },
        );
    }
}

/// Provides `regexp.compile(pattern)` and `regexp.match(pattern, s)`.
#[derive(Debug, Default)]
pub struct RegexpModule;

impl RegexpModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

impl CapabilityModule for RegexpModule {
    fn name(&self) -> &str {
        "Regexp"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "compile",
            lua.create_function(|_, pattern: String| Regexp::compile(&pattern).into_lua_err())?,
        )?;
        module.set(
            "match",
            lua.create_function(|_, (pattern, s): (String, String)| {
                Ok(Regexp::compile(&pattern).into_lua_err()?.0.is_match(&s))
            })?,
        )?;
        Ok(module)
    }
}
