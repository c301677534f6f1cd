//! HTTP over a [`NetDriver`](crate::NetDriver).
//!
//! - [`HttpRequest`] describes a request (headers, query, cookies, body).
//! - [`HttpClient`] sends it over the configured driver with the bounds of
//!   [`TransportConfig`].
//! - Responses carry a [`ResponseBody`]: the raw transport reader wrapped
//!   by decoding layers (gzip, then charset), released in reverse order.

mod bridge;
mod client;
mod config;
mod pipe;
mod pipeline;
mod request;
mod transport;

pub use client::{
    CONTENT_TYPE_BINARY, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, HttpClient,
    HttpResponse,
};
pub use config::{TlsPolicy, TransportConfig};
pub use pipe::{PipeReader, PipeWriter, pipe, spawn_producer};
pub use pipeline::{DecodeLayers, ReleaseHandle, ReleaseReport, ResponseBody};
pub use request::{HttpRequest, RequestBody};
