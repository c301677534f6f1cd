//! Lua capability modules backed by the network stack.
//!
//! Every module here holds the host's [`SharedDriver`](crate::driver::SharedDriver)
//! (directly or through an [`HttpClient`](crate::http::HttpClient) or
//! [`Resolver`](crate::dns::Resolver)); none of them opens sockets on its own.

mod conn;
mod dns;
mod http;
mod url;

pub use conn::{LuaConn, SocketModule};
pub use dns::DnsModule;
pub use http::{HttpModule, LuaResponse};
pub use url::UrlModule;

use std::time::Duration;

/// Convert a guest-supplied timeout in seconds.
pub(crate) fn seconds(value: Option<f64>) -> mlua::Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(mlua::Error::runtime(format!("invalid timeout: {secs}"))),
    }
}
