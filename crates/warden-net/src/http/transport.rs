//! HTTP/1.1 exchange over a driver connection.
//!
//! hyper speaks the protocol. This module dials through the driver, bridges
//! the connection into the client runtime, layers TLS for `https` URLs and
//! enforces the four bounds of [`TransportConfig`]:
//!
//! - the overall request deadline, a child [`DialContext`] that also bounds
//!   body reads;
//! - the TLS handshake;
//! - the wait for the response head once the body has been handed over;
//! - the `Expect: 100-continue` wait before the body is sent anyway.
//!
//! One request per connection (`Connection: close`).

use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use http::request::Parts;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri, header};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tokio_native_tls::TlsConnector;
use tracing::{debug, trace};
use url::Url;

use super::bridge::bridge;
use super::config::TransportConfig;
use super::pipeline::{DecodeLayers, ReleaseHandle, ResponseBody};
use super::request::{HttpRequest, RequestBody};
use crate::context::{ContextError, DialContext};
use crate::driver::{Conn, Connection, NetDriver, Network, join_host_port};
use crate::error::{NetError, NetResult};

/// Chunk size for streamed request bodies.
const CHUNK_SIZE: usize = 16 * 1024;

/// Streamed chunks buffered ahead of the connection.
const BODY_CHANNEL: usize = 4;

/// hyper's floor for its read buffer.
const MIN_READ_BUFFER: usize = 8 * 1024;

/// Caller headers the transport owns: framing follows the body, and every
/// connection carries exactly one request.
const TRANSPORT_HEADERS: [HeaderName; 3] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Body-read error for a finished context. Never `Interrupted`, so std read
/// loops stop; the payload keeps the [`NetError`].
fn context_io_error(err: ContextError) -> io::Error {
    match err {
        ContextError::Canceled => {
            io::Error::new(io::ErrorKind::ConnectionAborted, NetError::Canceled)
        }
        ContextError::DeadlineExceeded => {
            io::Error::new(io::ErrorKind::TimedOut, NetError::Timeout("request"))
        }
    }
}

fn context_net_error(err: ContextError) -> NetError {
    match err {
        ContextError::Canceled => NetError::Canceled,
        ContextError::DeadlineExceeded => NetError::Timeout("request"),
    }
}

fn hyper_error(err: hyper::Error) -> NetError {
    NetError::Protocol(err.to_string())
}

fn shutdown(conn: &dyn Connection) -> io::Result<()> {
    match conn.shutdown() {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

fn close_quietly(conn: &dyn Connection) {
    if let Err(e) = shutdown(conn) {
        debug!(error = %e, "Closing connection failed");
    }
}

fn header_pair(name: &str, value: &str) -> NetResult<(HeaderName, HeaderValue)> {
    let invalid = || NetError::Protocol(format!("invalid header '{name}'"));
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}

/// Build the request line and headers.
///
/// `Host` defaults to the URL authority. A caller `Cookie` header is kept
/// and joined with the cookie map. `User-Agent` and `Content-Type` are
/// filled in when absent. Framing headers come from the body.
pub(crate) fn request_head(
    request: &HttpRequest,
    url: &Url,
    config: &TransportConfig,
) -> NetResult<Parts> {
    let host = url
        .host_str()
        .ok_or_else(|| NetError::InvalidUrl(format!("{url}: missing host")))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    let mut target = url.path().to_owned();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut headers = HeaderMap::new();
    let (name, value) = header_pair("Host", request.header_value("host").unwrap_or(&authority))?;
    headers.insert(name, value);
    for (name, value) in request.headers() {
        let (name, value) = header_pair(name, value)?;
        if name == header::HOST || name == header::COOKIE || TRANSPORT_HEADERS.contains(&name) {
            continue;
        }
        headers.append(name, value);
    }

    let mut set = |name: &str, value: &str| -> NetResult<()> {
        let (name, value) = header_pair(name, value)?;
        headers.insert(name, value);
        Ok(())
    };
    if request.header_value("user-agent").is_none() {
        set("User-Agent", &config.user_agent)?;
    }
    if request.header_value("content-type").is_none() {
        if let Some(content_type) = request.effective_content_type() {
            set("Content-Type", content_type)?;
        }
    }
    let cookie = match (request.header_value("cookie"), request.cookie_header()) {
        (Some(explicit), Some(jar)) => Some(format!("{explicit}; {jar}")),
        (explicit, jar) => jar.or_else(|| explicit.map(str::to_owned)),
    };
    if let Some(cookie) = cookie {
        set("Cookie", &cookie)?;
    }
    match request.body_ref() {
        RequestBody::Bytes(b) => set("Content-Length", &b.len().to_string())?,
        RequestBody::Empty if matches!(request.method(), "POST" | "PUT" | "PATCH") => {
            set("Content-Length", "0")?
        }
        // Streams go out chunked; hyper adds the header.
        RequestBody::Stream(_) | RequestBody::Empty => {}
    }
    set("Connection", "close")?;

    let (mut parts, ()) = Request::new(()).into_parts();
    parts.method = Method::from_bytes(request.method().as_bytes())
        .map_err(|_| NetError::Protocol(format!("invalid method '{}'", request.method())))?;
    parts.uri = target
        .parse::<Uri>()
        .map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
    parts.headers = headers;
    Ok(parts)
}

/// Holds the body back until an interim response arrives or the
/// `100 Continue` wait elapses.
struct ContinueGate {
    interim: oneshot::Receiver<()>,
    wait: Duration,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ContinueGate {
    fn poll_open(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if Pin::new(&mut self.interim).poll(cx).is_ready() {
            return Poll::Ready(());
        }
        let wait = self.wait;
        self.timer
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(wait)))
            .as_mut()
            .poll(cx)
    }
}

enum Payload {
    Full(Option<Bytes>),
    Stream(mpsc::Receiver<io::Result<Bytes>>),
}

/// Request payload as handed to hyper.
pub(crate) struct OutgoingBody {
    payload: Payload,
    gate: Option<ContinueGate>,
    sent: Option<oneshot::Sender<()>>,
}

impl OutgoingBody {
    /// Convert `body`. The receiver, present when there is anything to
    /// send, fires once the last frame has been handed over.
    fn new(
        body: RequestBody,
        gate: Option<ContinueGate>,
    ) -> io::Result<(Self, Option<oneshot::Receiver<()>>)> {
        let payload = match body {
            RequestBody::Empty => Payload::Full(None),
            RequestBody::Bytes(bytes) if bytes.is_empty() => Payload::Full(None),
            RequestBody::Bytes(bytes) => Payload::Full(Some(bytes)),
            RequestBody::Stream(reader) => Payload::Stream(spawn_feeder(reader)?),
        };
        let (sent, done) = match payload {
            Payload::Full(None) => (None, None),
            _ => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
        };
        Ok((
            Self {
                payload,
                gate,
                sent,
            },
            done,
        ))
    }

    fn finish(&mut self) {
        if let Some(sent) = self.sent.take() {
            let _ = sent.send(());
        }
    }
}

impl Body for OutgoingBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = &mut *self;
        if let Some(gate) = this.gate.as_mut() {
            if gate.poll_open(cx).is_pending() {
                return Poll::Pending;
            }
            this.gate = None;
        }
        let frame = match &mut this.payload {
            Payload::Full(data) => data.take().map(|data| Ok(Frame::data(data))),
            Payload::Stream(chunks) => match chunks.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(chunk) => chunk.map(|chunk| chunk.map(Frame::data)),
            },
        };
        if frame.is_none() || this.is_end_stream() {
            this.finish();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.payload, Payload::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.payload {
            Payload::Full(data) => {
                SizeHint::with_exact(data.as_ref().map_or(0, |data| data.len() as u64))
            }
            Payload::Stream(_) => SizeHint::default(),
        }
    }
}

/// Read a streamed body on its own thread into a bounded channel. A read
/// error is forwarded and ends the stream.
fn spawn_feeder(mut reader: Box<dyn Read + Send>) -> io::Result<mpsc::Receiver<io::Result<Bytes>>> {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL);
    thread::Builder::new()
        .name("warden-http-body".into())
        .spawn(move || {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let item = match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => Ok(Bytes::copy_from_slice(&chunk[..n])),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// A response head.
#[derive(Debug, Clone)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    fn from_parts(parts: &http::response::Parts) -> Self {
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|phrase| String::from_utf8_lossy(phrase.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(str::to_owned))
            .unwrap_or_default();
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        Self {
            status: parts.status.as_u16(),
            reason,
            headers,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

enum Next {
    Frame(Option<Result<Frame<Bytes>, hyper::Error>>),
    Stopped(ContextError),
}

/// Blocking reader over hyper's response body, bounded by the request
/// context.
struct IncomingReader {
    runtime: Arc<Runtime>,
    body: Incoming,
    ctx: DialContext,
    pending: Bytes,
    done: bool,
}

impl Read for IncomingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.pending.is_empty() {
                let n = buf.len().min(self.pending.len());
                self.pending.copy_to_slice(&mut buf[..n]);
                return Ok(n);
            }
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            if let Some(err) = self.ctx.err() {
                return Err(context_io_error(err));
            }

            let body = &mut self.body;
            let ctx = &self.ctx;
            let next = self.runtime.block_on(async {
                tokio::select! {
                    frame = body.frame() => Next::Frame(frame),
                    err = ctx.done() => Next::Stopped(err),
                }
            });
            match next {
                Next::Frame(None) => self.done = true,
                Next::Frame(Some(Ok(frame))) => {
                    // Trailers carry no body bytes.
                    if let Ok(data) = frame.into_data() {
                        self.pending = data;
                    }
                }
                Next::Frame(Some(Err(e))) => return Err(io::Error::other(e)),
                Next::Stopped(err) => return Err(context_io_error(err)),
            }
        }
    }
}

/// A response head plus its (already layered) body.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

/// Perform one request over `driver`.
pub(crate) fn round_trip(
    runtime: &Arc<Runtime>,
    driver: &dyn NetDriver,
    tls: &TlsConnector,
    config: &TransportConfig,
    ctx: &DialContext,
    mut request: HttpRequest,
) -> NetResult<RawResponse> {
    let ctx = ctx.child_with_timeout(config.request_timeout);
    let url = request.target_url();
    let host = url
        .host_str()
        .ok_or_else(|| NetError::InvalidUrl(format!("{url}: missing host")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_owned();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| NetError::InvalidUrl(format!("{url}: missing port")))?;
    let head = request_head(&request, &url, config)?;
    let expect_continue = head
        .headers
        .get(header::EXPECT)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"100-continue"))
        && !request.body_ref().is_empty();
    let started = Instant::now();

    let conn = driver.dial(&ctx, Network::Tcp, &join_host_port(&host, port))?;
    let closer: Conn = conn.try_clone()?;

    // From here on the connection must be shut down on every error path.
    let stream = match bridge(conn, runtime.handle()) {
        Ok(stream) => stream,
        Err(e) => {
            close_quietly(&*closer);
            return Err(e.into());
        }
    };

    let (interim, gate) = if expect_continue {
        let (tx, rx) = oneshot::channel();
        let gate = ContinueGate {
            interim: rx,
            wait: config.expect_continue_timeout,
            timer: None,
        };
        (Some(tx), Some(gate))
    } else {
        (None, None)
    };
    let (body, sent) = match OutgoingBody::new(request.take_body(), gate) {
        Ok(outgoing) => outgoing,
        Err(e) => {
            close_quietly(&*closer);
            return Err(e.into());
        }
    };
    let mut outgoing = Request::from_parts(head, body);
    if let Some(tx) = interim {
        let tx = Mutex::new(Some(tx));
        hyper::ext::on_informational(&mut outgoing, move |_| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        });
    }

    let target = Target {
        host: &host,
        https: url.scheme() == "https",
    };
    let exchanged = runtime.block_on(async {
        tokio::select! {
            response = exchange(stream, tls, config, target, outgoing, sent) => response,
            err = ctx.done() => Err(context_net_error(err)),
        }
    });
    let response = match exchanged {
        Ok(response) => response,
        Err(e) => {
            close_quietly(&*closer);
            return Err(e);
        }
    };

    let (parts, incoming) = response.into_parts();
    let head = ResponseHead::from_parts(&parts);
    debug!(
        method = request.method(),
        url = %url,
        status = head.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Response head received"
    );

    let no_body = request.method() == "HEAD"
        || (100..200).contains(&head.status)
        || head.status == 204
        || head.status == 304;
    if no_body {
        close_quietly(&*closer);
        return Ok(RawResponse {
            head,
            body: ResponseBody::empty(),
        });
    }

    let reader = IncomingReader {
        runtime: Arc::clone(runtime),
        body: incoming,
        ctx,
        pending: Bytes::new(),
        done: false,
    };
    let release = ReleaseHandle::new("transport", move || shutdown(&*closer));
    let body = ResponseBody::new(reader, release);
    let layers = DecodeLayers::from_headers(
        head.header("content-encoding"),
        head.header("content-type"),
    );
    let body = layers.apply(body)?;
    Ok(RawResponse { head, body })
}

#[derive(Clone, Copy)]
struct Target<'a> {
    host: &'a str,
    https: bool,
}

async fn exchange(
    stream: DuplexStream,
    tls: &TlsConnector,
    config: &TransportConfig,
    target: Target<'_>,
    request: Request<OutgoingBody>,
    sent: Option<oneshot::Receiver<()>>,
) -> NetResult<Response<Incoming>> {
    if !target.https {
        return send(stream, config, request, sent).await;
    }
    let stream = tokio::time::timeout(config.tls_handshake_timeout, tls.connect(target.host, stream))
        .await
        .map_err(|_| NetError::Timeout("TLS handshake"))?
        .map_err(|e| NetError::Tls(e.to_string()))?;
    trace!(host = target.host, "TLS established");
    send(stream, config, request, sent).await
}

async fn send<S>(
    io: S,
    config: &TransportConfig,
    request: Request<OutgoingBody>,
    sent: Option<oneshot::Receiver<()>>,
) -> NetResult<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut builder = http1::Builder::new();
    builder
        .title_case_headers(true)
        .max_buf_size(config.max_header_bytes.max(MIN_READ_BUFFER));
    let (mut sender, connection) = builder
        .handshake(TokioIo::new(io))
        .await
        .map_err(hyper_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "HTTP connection ended with error");
        }
    });

    let header_wait = async {
        if let Some(sent) = sent {
            let _ = sent.await;
        }
        tokio::time::sleep(config.response_header_timeout).await;
    };
    tokio::select! {
        response = sender.send_request(request) => response.map_err(hyper_error),
        () = header_wait => Err(NetError::Timeout("response header")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_of(request: &HttpRequest) -> NetResult<Parts> {
        request_head(request, &request.target_url(), &TransportConfig::default())
    }

    #[test]
    fn test_request_head() {
        let request = HttpRequest::new("POST", "http://example.com:8080/p")
            .unwrap()
            .query("a", "1")
            .header("X-Id", "7")
            .cookie("s", "x")
            .content_type("text/plain")
            .body("hi");
        let head = head_of(&request).unwrap();

        assert_eq!(head.method, Method::POST);
        assert_eq!(head.uri, "/p?a=1");
        assert_eq!(head.headers["host"], "example.com:8080");
        assert_eq!(head.headers["x-id"], "7");
        assert_eq!(head.headers["content-type"], "text/plain");
        assert_eq!(head.headers["cookie"], "s=x");
        assert_eq!(head.headers["content-length"], "2");
        assert_eq!(head.headers["connection"], "close");
        assert!(head.headers["user-agent"].to_str().unwrap().starts_with("warden/"));
    }

    #[test]
    fn test_cookie_header_is_kept_and_merged() {
        let request = HttpRequest::new("GET", "http://a/")
            .unwrap()
            .header("Cookie", "sid=1");
        assert_eq!(head_of(&request).unwrap().headers["cookie"], "sid=1");

        let request = request.cookie("s", "x");
        let head = head_of(&request).unwrap();
        assert_eq!(head.headers.get_all("cookie").iter().count(), 1);
        assert_eq!(head.headers["cookie"], "sid=1; s=x");
    }

    #[test]
    fn test_transport_owns_framing_headers() {
        let request = HttpRequest::new("PUT", "http://a/")
            .unwrap()
            .header("Host", "virtual.test")
            .header("Content-Length", "999")
            .header("Connection", "keep-alive")
            .body("abc");
        let head = head_of(&request).unwrap();
        assert_eq!(head.headers["host"], "virtual.test");
        assert_eq!(head.headers["content-length"], "3");
        assert_eq!(head.headers["connection"], "close");
    }

    #[test]
    fn test_header_injection_rejected() {
        let request = HttpRequest::new("GET", "http://a/")
            .unwrap()
            .header("X-Bad", "v\r\nEvil: 1");
        assert!(head_of(&request).is_err());
    }

    #[test]
    fn test_context_errors_stop_read_loops() {
        let canceled = context_io_error(ContextError::Canceled);
        assert_ne!(canceled.kind(), io::ErrorKind::Interrupted);
        assert!(NetError::from(canceled).is_canceled());

        let expired = context_io_error(ContextError::DeadlineExceeded);
        assert_eq!(expired.kind(), io::ErrorKind::TimedOut);
        assert!(NetError::from(expired).is_timeout());
    }
}
