//! The HTTP client handed to the `net.http` module.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio_native_tls::TlsConnector;
use tracing::{info, warn};

use super::config::{TlsPolicy, TransportConfig};
use super::pipe::spawn_producer;
use super::pipeline::{ReleaseReport, ResponseBody};
use super::request::HttpRequest;
use super::transport::round_trip;
use crate::context::DialContext;
use crate::driver::SharedDriver;
use crate::error::{NetError, NetResult};

/// Default content type of [`HttpClient::post_json`].
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Default content type of [`HttpClient::post_form`].
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
/// Default content type of [`HttpClient::post_string`].
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// Default content type of [`HttpClient::post_buffer`].
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// A received response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Final request URL.
    pub url: String,
    headers: Vec<(String, String)>,
    body: ResponseBody,
}

impl HttpResponse {
    /// First header named `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every header, names lowercased.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The decoded body.
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Read the rest of the body and release it.
    pub fn bytes(mut self) -> NetResult<Vec<u8>> {
        let mut out = Vec::new();
        let read = self.body.read_to_end(&mut out);
        self.body.release();
        read?;
        Ok(out)
    }

    /// Read the rest of the body as UTF-8 (lossy) and release it.
    pub fn text(self) -> NetResult<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Release the body.
    pub fn close(&mut self) -> ReleaseReport {
        self.body.release()
    }
}

struct ClientInner {
    driver: SharedDriver,
    config: TransportConfig,
    tls: TlsConnector,
    runtime: Arc<Runtime>,
}

impl fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInner")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// HTTP client bound to one driver and one transport configuration.
///
/// Cheap to clone; clones share the driver and TLS connector.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend or the client runtime cannot be
    /// initialised.
    pub fn new(driver: SharedDriver, config: TransportConfig) -> NetResult<Self> {
        let mut builder = native_tls::TlsConnector::builder();
        if config.tls_policy == TlsPolicy::AcceptInvalidCerts {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
            warn!(
                driver = driver.name(),
                "TLS certificate verification disabled for script HTTP traffic"
            );
        }
        let tls = builder.build().map_err(|e| NetError::Tls(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("warden-http")
            .enable_all()
            .build()?;
        info!(
            driver = driver.name(),
            request_timeout_ms = config.request_timeout.as_millis() as u64,
            "HTTP client created"
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                driver,
                config,
                tls: TlsConnector::from(tls),
                runtime: Arc::new(runtime),
            }),
        })
    }

    /// The transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Send `request` with no caller deadline beyond the configured ones.
    pub fn execute(&self, request: HttpRequest) -> NetResult<HttpResponse> {
        self.execute_with(&DialContext::background(), request)
    }

    /// Send `request` under `ctx`.
    pub fn execute_with(&self, ctx: &DialContext, request: HttpRequest) -> NetResult<HttpResponse> {
        let url = request.target_url().to_string();
        let raw = round_trip(
            &self.inner.runtime,
            self.inner.driver.as_ref(),
            &self.inner.tls,
            &self.inner.config,
            ctx,
            request,
        )?;
        Ok(HttpResponse {
            status: raw.head.status,
            reason: raw.head.reason,
            url,
            headers: raw.head.headers,
            body: raw.body,
        })
    }

    /// `GET url`.
    pub fn get(&self, url: &str) -> NetResult<HttpResponse> {
        self.execute(HttpRequest::new("GET", url)?)
    }

    /// `HEAD url`.
    pub fn head(&self, url: &str) -> NetResult<HttpResponse> {
        self.execute(HttpRequest::new("HEAD", url)?)
    }

    /// `DELETE url`.
    pub fn delete(&self, url: &str) -> NetResult<HttpResponse> {
        self.execute(HttpRequest::new("DELETE", url)?)
    }

    /// `PUT url` with an optional body.
    pub fn put(
        &self,
        url: &str,
        content_type: Option<&str>,
        body: Option<Bytes>,
    ) -> NetResult<HttpResponse> {
        let mut request = HttpRequest::new("PUT", url)?;
        if let Some(body) = body {
            request = request
                .content_type(content_type.unwrap_or(CONTENT_TYPE_BINARY))
                .body(body);
        }
        self.execute(request)
    }

    /// `POST url` with the given content type and body.
    pub fn post(&self, url: &str, content_type: &str, body: Bytes) -> NetResult<HttpResponse> {
        self.execute(
            HttpRequest::new("POST", url)?
                .content_type(content_type)
                .body(body),
        )
    }

    /// `POST` a value as JSON.
    ///
    /// The body is serialized on a background thread into a pipe the
    /// transport streams from; a serialization failure fails the request.
    pub fn post_json<T>(&self, url: &str, value: T, content_type: Option<&str>) -> NetResult<HttpResponse>
    where
        T: Serialize + Send + 'static,
    {
        let request = HttpRequest::new("POST", url)?
            .content_type(content_type.unwrap_or(CONTENT_TYPE_JSON));
        let body = spawn_producer("warden-json-body", move |writer| {
            serde_json::to_writer(&mut *writer, &value).map_err(io::Error::other)?;
            io::Write::write_all(writer, b"\n")
        })?;
        self.execute(request.body_stream(body))
    }

    /// `POST` form fields, URL-encoded.
    pub fn post_form<I, K, V>(&self, url: &str, fields: I, content_type: Option<&str>) -> NetResult<HttpResponse>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.post(url, content_type.unwrap_or(CONTENT_TYPE_FORM), Bytes::from(encoded))
    }

    /// `POST` a text body.
    pub fn post_string(
        &self,
        url: &str,
        body: impl Into<String>,
        content_type: Option<&str>,
    ) -> NetResult<HttpResponse> {
        self.post(
            url,
            content_type.unwrap_or(CONTENT_TYPE_TEXT),
            Bytes::from(body.into()),
        )
    }

    /// `POST` raw bytes.
    pub fn post_buffer(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        content_type: Option<&str>,
    ) -> NetResult<HttpResponse> {
        self.post(url, content_type.unwrap_or(CONTENT_TYPE_BINARY), body.into())
    }
}
