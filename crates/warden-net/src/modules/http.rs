//! `net.http` module.

use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use mlua::{
    AnyUserData, ExternalResult, Lua, LuaSerdeExt, Table, UserData, UserDataFields,
    UserDataMethods, Value,
};
use parking_lot::Mutex;
use tracing::debug;
use warden_capability::CapabilityModule;
use warden_capability::builtin::Buffer;

use super::seconds;
use crate::context::DialContext;
use crate::http::{HttpClient, HttpRequest, HttpResponse};

const DEFAULT_READ_SIZE: usize = 8192;
const MAX_READ_SIZE: usize = 16 * 1024 * 1024;

/// A response handed to guest code.
///
/// `status`, `reason` and `url` are fields; the body is read through
/// methods and released by `close()` or when the value is collected.
#[derive(Debug)]
pub struct LuaResponse {
    status: u16,
    reason: String,
    url: String,
    response: Mutex<Option<HttpResponse>>,
}

impl LuaResponse {
    fn new(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            reason: response.reason.clone(),
            url: response.url.clone(),
            response: Mutex::new(Some(response)),
        }
    }

    fn with_response<T>(&self, f: impl FnOnce(&mut HttpResponse) -> mlua::Result<T>) -> mlua::Result<T> {
        let mut guard = self.response.lock();
        let response = guard
            .as_mut()
            .ok_or_else(|| mlua::Error::runtime("response closed"))?;
        f(response)
    }
}

impl UserData for LuaResponse {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("status", |_, this| Ok(this.status));
        fields.add_field_method_get("reason", |_, this| Ok(this.reason.clone()));
        fields.add_field_method_get("url", |_, this| Ok(this.url.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("header", |_, this, name: String| {
            this.with_response(|r| Ok(r.header(&name).map(str::to_owned)))
        });
        methods.add_method("headers", |lua, this, ()| {
            this.with_response(|r| {
                let table = lua.create_table()?;
                for (name, value) in r.headers() {
                    table.set(name.to_ascii_lowercase(), value.as_str())?;
                }
                Ok(table)
            })
        });
        methods.add_method("read", |lua, this, n: Option<usize>| {
            let n = n.unwrap_or(DEFAULT_READ_SIZE).clamp(1, MAX_READ_SIZE);
            let mut buf = vec![0u8; n];
            let read = this.with_response(|r| r.body_mut().read(&mut buf).into_lua_err())?;
            if read == 0 {
                return Ok(Value::Nil);
            }
            lua.create_string(&buf[..read]).map(Value::String)
        });
        methods.add_method("read_all", |lua, this, ()| {
            let mut body = Vec::new();
            this.with_response(|r| r.body_mut().read_to_end(&mut body).into_lua_err())?;
            lua.create_string(body)
        });
        methods.add_method("close", |_, this, ()| {
            let Some(mut response) = this.response.lock().take() else {
                return Ok((true, None));
            };
            let report = response.close();
            if report.is_clean() {
                return Ok((true, None));
            }
            let message = report
                .failures
                .iter()
                .map(|(name, error)| format!("{name}: {error}"))
                .collect::<Vec<_>>()
                .join("; ");
            Ok((false, Some(message)))
        });
    }
}

/// Sorted `(key, value)` pairs of a Lua table; numbers coerce to strings.
fn string_pairs(table: Option<Table>) -> mlua::Result<Vec<(String, String)>> {
    let mut pairs = match table {
        Some(table) => table
            .pairs::<String, String>()
            .collect::<mlua::Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    pairs.sort();
    Ok(pairs)
}

/// Body bytes from a Lua string or a `buffer` value.
fn body_bytes(value: Value) -> mlua::Result<Option<Bytes>> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(Bytes::copy_from_slice(&s.as_bytes()))),
        Value::UserData(ud) => body_from_userdata(&ud).map(Some),
        other => Err(mlua::Error::runtime(format!(
            "body must be a string or buffer, got {}",
            other.type_name()
        ))),
    }
}

fn body_from_userdata(ud: &AnyUserData) -> mlua::Result<Bytes> {
    let buffer = ud.borrow::<Buffer>()?;
    Ok(Bytes::copy_from_slice(buffer.as_bytes()))
}

/// Build a request from the `request{...}` argument table.
fn request_from_table(options: &Table) -> mlua::Result<(HttpRequest, Option<Duration>)> {
    let method: Option<String> = options.get("method")?;
    let url: String = options
        .get::<Option<String>>("url")?
        .ok_or_else(|| mlua::Error::runtime("request: url is required"))?;
    let mut request =
        HttpRequest::new(&method.unwrap_or_else(|| "GET".into()), &url).into_lua_err()?;

    for (name, value) in string_pairs(options.get("header")?)? {
        request = request.header(name, value);
    }
    for (key, value) in string_pairs(options.get("query")?)? {
        request = request.query(key, value);
    }
    for (name, value) in string_pairs(options.get("cookie")?)? {
        request = request.cookie(name, value);
    }
    if let Some(content_type) = options.get::<Option<String>>("type")? {
        request = request.content_type(content_type);
    }
    if let Some(body) = body_bytes(options.get("body")?)? {
        request = request.body(body);
    }
    let timeout = seconds(options.get("timeout")?)?;
    Ok((request, timeout))
}

/// Provides the `net.http` functions over one [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpModule {
    client: HttpClient,
}

impl HttpModule {
    /// Create the module around `client`.
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

fn respond(result: crate::error::NetResult<HttpResponse>) -> mlua::Result<LuaResponse> {
    let response = result.into_lua_err()?;
    debug!(status = response.status, url = %response.url, "Guest HTTP response");
    Ok(LuaResponse::new(response))
}

impl CapabilityModule for HttpModule {
    fn name(&self) -> &str {
        "HTTP"
    }

    fn install(&self, lua: &Lua) -> mlua::Result<Table> {
        let module = lua.create_table()?;

        let client = self.client.clone();
        module.set(
            "request",
            lua.create_function(move |_, options: Table| {
                let (request, timeout) = request_from_table(&options)?;
                let ctx = match timeout {
                    Some(timeout) => DialContext::with_timeout(timeout),
                    None => DialContext::background(),
                };
                respond(client.execute_with(&ctx, request))
            })?,
        )?;

        let client = self.client.clone();
        module.set(
            "get",
            lua.create_function(move |_, url: String| respond(client.get(&url)))?,
        )?;

        let client = self.client.clone();
        module.set(
            "get_string",
            lua.create_function(move |_, url: String| {
                let response = client.get(&url).into_lua_err()?;
                let status = response.status;
                let text = response.text().into_lua_err()?;
                Ok((text, status))
            })?,
        )?;

        let client = self.client.clone();
        module.set(
            "get_buffer",
            lua.create_function(move |_, url: String| {
                let response = client.get(&url).into_lua_err()?;
                let status = response.status;
                let bytes = response.bytes().into_lua_err()?;
                Ok((Buffer::from_bytes(bytes), status))
            })?,
        )?;

        let client = self.client.clone();
        module.set(
            "head",
            lua.create_function(move |_, url: String| respond(client.head(&url)))?,
        )?;

        let client = self.client.clone();
        module.set(
            "delete",
            lua.create_function(move |_, url: String| respond(client.delete(&url)))?,
        )?;

        let client = self.client.clone();
        module.set(
            "put",
            lua.create_function(
                move |_, (url, body, content_type): (String, Value, Option<String>)| {
                    let body = body_bytes(body)?;
                    respond(client.put(&url, content_type.as_deref(), body))
                },
            )?,
        )?;

        let client = self.client.clone();
        module.set(
            "post",
            lua.create_function(
                move |_, (url, content_type, body): (String, String, Value)| {
                    let body = body_bytes(body)?.unwrap_or_default();
                    respond(client.post(&url, &content_type, body))
                },
            )?,
        )?;

        let client = self.client.clone();
        module.set(
            "post_json",
            lua.create_function(
                move |lua, (url, value, content_type): (String, Value, Option<String>)| {
                    let json: serde_json::Value = lua.from_value(value)?;
                    respond(client.post_json(&url, json, content_type.as_deref()))
                },
            )?,
        )?;

        let client = self.client.clone();
        module.set(
            "post_form",
            lua.create_function(
                move |_, (url, fields, content_type): (String, Table, Option<String>)| {
                    let fields = string_pairs(Some(fields))?;
                    respond(client.post_form(&url, fields, content_type.as_deref()))
                },
            )?,
        )?;

        let client = self.client.clone();
        module.set(
            "post_string",
            lua.create_function(
                move |_, (url, body, content_type): (String, String, Option<String>)| {
                    respond(client.post_string(&url, body, content_type.as_deref()))
                },
            )?,
        )?;

        let client = self.client.clone();
        module.set(
            "post_buffer",
            lua.create_function(
                move |_, (url, body, content_type): (String, Value, Option<String>)| {
                    let body = body_bytes(body)?.unwrap_or_default();
                    respond(client.post_buffer(&url, body, content_type.as_deref()))
                },
            )?,
        )?;

        Ok(module)
    }
}
