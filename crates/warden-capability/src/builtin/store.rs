//! `store` module: a process-wide key/value map shared by every context.

use std::sync::Arc;

use dashmap::DashMap;
use mlua::{Lua, LuaSerdeExt, Table, Value};

use crate::capability::CapabilityModule;

/// Shared map behind the `store` namespace.
///
/// Values are held as JSON so they can cross interpreter boundaries; tables
/// are copied in and out, never shared by reference.
#[derive(Debug, Clone, Default)]
pub struct StoreModule {
    entries: Arc<DashMap<String, serde_json::Value>>,
}

impl StoreModule {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a value from the host side.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }
}

impl CapabilityModule for StoreModule {
    fn name(&self) -> &str {
        "Store"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;

        let entries = Arc::clone(&self.entries);
        module.set(
            "get",
            lua.create_function(move |lua, key: String| match entries.get(&key) {
                Some(value) => lua.to_value(value.value()),
                None => Ok(Value::Nil),
            })?,
        )?;

        let entries = Arc::clone(&self.entries);
        module.set(
            "set",
            lua.create_function(move |lua, (key, value): (String, Value)| {
                if value.is_nil() {
                    entries.remove(&key);
                } else {
                    let json: serde_json::Value = lua.from_value(value)?;
                    entries.insert(key, json);
                }
                Ok(())
            })?,
        )?;

        let entries = Arc::clone(&self.entries);
        module.set(
            "delete",
            lua.create_function(move |_, key: String| Ok(entries.remove(&key).is_some()))?,
        )?;

        let entries = Arc::clone(&self.entries);
        module.set(
            "keys",
            lua.create_function(move |lua, ()| {
                let mut keys: Vec<String> = entries.iter().map(|e| e.key().clone()).collect();
                keys.sort();
                lua.create_sequence_from(keys)
            })?,
        )?;

        let entries = Arc::clone(&self.entries);
        module.set("len", lua.create_function(move |_, ()| Ok(entries.len()))?)?;

        // Atomic under the entry lock, so concurrent runs never lose updates.
        let entries = Arc::clone(&self.entries);
        module.set(
            "incr",
            lua.create_function(move |_, (key, delta): (String, Option<i64>)| {
                let delta = delta.unwrap_or(1);
                let mut entry = entries.entry(key).or_insert(serde_json::Value::from(0));
                let current = entry
                    .value()
                    .as_i64()
                    .ok_or_else(|| mlua::Error::runtime("store.incr: value is not an integer"))?;
                let next = current.wrapping_add(delta);
                *entry.value_mut() = serde_json::Value::from(next);
                Ok(next)
            })?,
        )?;

        Ok(module)
    }
}
