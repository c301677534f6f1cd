//! Warden Network Layer
//!
//! Every network effect a guest script can cause goes through one
//! [`NetDriver`]. This crate provides:
//!
//! - [`DirectDriver`]: dials on the local network stack, honouring the
//!   deadline and cancel token of a [`DialContext`]
//! - [`ProxyDriver`]: tunnels TCP through an HTTP CONNECT or SOCKS5 proxy
//!   reached with a delegate driver
//! - [`http`]: an HTTP/1.1 client with a layered, ordered-release response
//!   pipeline
//! - [`dns`]: a stub resolver whose queries also travel through the driver
//! - [`modules`]: the `net.tcp`, `net.udp`, `net.http`, `net.dns` and
//!   `net.url` capability modules
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_net::{DirectDriver, ProxyDriver, SharedDriver};
//! use warden_net::http::{HttpClient, TransportConfig};
//!
//! let direct: SharedDriver = Arc::new(DirectDriver::new()?);
//! let proxy: SharedDriver = Arc::new(ProxyDriver::new("http://127.0.0.1:8888", direct)?);
//!
//! let client = HttpClient::new(proxy, TransportConfig::new())?;
//! let text = client.get("http://example.com/")?.text()?;
//! println!("{text}");
//! # Ok::<(), warden_net::NetError>(())
//! ```

pub mod context;
pub mod dns;
pub mod driver;
pub mod error;
pub mod http;
pub mod modules;

// Re-export main types
pub use context::{CancelToken, ContextError, DialContext};
pub use dns::{Resolver, ResolverConfig};
pub use driver::{
    Conn, Connection, DirectDriver, NetDriver, Network, ProxyDriver, ProxyProtocol, SharedDriver,
};
pub use error::{NetError, NetResult};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::{CancelToken, DialContext};
    pub use crate::driver::{DirectDriver, NetDriver, Network, ProxyDriver, SharedDriver};
    pub use crate::error::{NetError, NetResult};
    pub use crate::http::{HttpClient, HttpRequest, TransportConfig};
}
