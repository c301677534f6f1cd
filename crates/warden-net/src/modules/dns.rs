//! `net.dns` module.

use mlua::{ExternalResult, Lua, Table};
use warden_capability::CapabilityModule;

use crate::dns::Resolver;

/// Provides `lookup(name)`, returning a list of address strings.
#[derive(Debug, Clone)]
pub struct DnsModule {
    resolver: Resolver,
}

impl DnsModule {
    /// Create the module around `resolver`.
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }
}

impl CapabilityModule for DnsModule {
    fn name(&self) -> &str {
        "DNS"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        let resolver = self.resolver.clone();
        module.set(
            "lookup",
            lua.create_function(move |lua, name: String| {
                let addresses = resolver.lookup(&name).into_lua_err()?;
                lua.create_sequence_from(addresses.iter().map(ToString::to_string))
            })?,
        )?;
        Ok(module)
    }
}
