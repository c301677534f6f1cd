//! `net.url` module: URL parsing and query encoding.

use mlua::{ExternalResult, Lua, Table, Value};
use url::Url;
use url::form_urlencoded;
use warden_capability::CapabilityModule;

/// Provides `parse`, `join`, `encode_query`, `parse_query`, `escape` and
/// `unescape`.
#[derive(Debug, Default)]
pub struct UrlModule;

impl UrlModule {
    /// Create the module.
    pub fn new() -> Self {
        Self
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes and `+` as space; malformed escapes are kept.
fn unescape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'%' if i + 2 < input.len() => {
                match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                    _ => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn url_table(lua: &Lua, url: &Url) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("href", url.as_str())?;
    table.set("scheme", url.scheme())?;
    table.set("host", url.host_str())?;
    table.set("port", url.port_or_known_default())?;
    table.set("path", url.path())?;
    table.set("query", url.query())?;
    table.set("fragment", url.fragment())?;
    if !url.username().is_empty() {
        table.set("username", url.username())?;
    }
    table.set("password", url.password())?;
    Ok(table)
}

impl CapabilityModule for UrlModule {
    fn name(&self) -> &str {
        "URL"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;
        module.set(
            "parse",
            lua.create_function(|lua, raw: String| {
                let url = Url::parse(&raw).into_lua_err()?;
                url_table(lua, &url)
            })?,
        )?;
        module.set(
            "join",
            lua.create_function(|_, (base, reference): (String, String)| {
                let base = Url::parse(&base).into_lua_err()?;
                Ok(base.join(&reference).into_lua_err()?.to_string())
            })?,
        )?;
        module.set(
            "encode_query",
            lua.create_function(|_, fields: Table| {
                let mut pairs = fields
                    .pairs::<String, String>()
                    .collect::<mlua::Result<Vec<_>>>()?;
                pairs.sort();
                Ok(form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish())
            })?,
        )?;
        module.set(
            "parse_query",
            lua.create_function(|lua, query: String| {
                let table = lua.create_table()?;
                let query = query.strip_prefix('?').unwrap_or(&query);
                for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                    // Repeated keys keep the first value.
                    if table.get::<Value>(key.as_ref())?.is_nil() {
                        table.set(key.as_ref(), value.as_ref())?;
                    }
                }
                Ok(table)
            })?,
        )?;
        module.set(
            "escape",
            lua.create_function(|_, s: mlua::String| {
                Ok(form_urlencoded::byte_serialize(&s.as_bytes()).collect::<String>())
            })?,
        )?;
        module.set(
            "unescape",
            lua.create_function(|lua, s: mlua::String| lua.create_string(unescape(&s.as_bytes())))?,
        )?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(b"a%20b+c"), b"a b c");
        assert_eq!(unescape(b"100%"), b"100%");
        assert_eq!(unescape(b"%zz%4"), b"%zz%4");
        assert_eq!(unescape(b"%E4%BD%A0"), "你".as_bytes());
    }

    #[test]
    fn test_url_from_lua() {
        let lua = Lua::new();
        lua.globals()
            .set("url", UrlModule::new().install(&lua).unwrap())
            .unwrap();

        let (host, port, joined, query, escaped, first): (String, u16, String, String, String, String) = lua
            .load(
                r#"
                local u = url.parse("https://example.com/a/b?x=1#top")
                return u.host, u.port,
                    url.join("https://example.com/a/b", "../c"),
                    url.encode_query({ b = "2", a = "x y" }),
                    url.escape("a&b=c"),
                    url.parse_query("?k=1&k=2").k
            "#,
            )
            .eval()
            .unwrap();

        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
        assert_eq!(joined, "https://example.com/c");
        assert_eq!(query, "a=x+y&b=2");
        assert_eq!(escaped, "a%26b%3Dc");
        assert_eq!(first, "1");
    }
}
