//! Layered response bodies with ordered release.
//!
//! A [`ResponseBody`] starts as the raw transport reader plus the transport's
//! release handle. Decoding layers wrap the current reader and may register
//! handles of their own. Release walks the handle list in reverse
//! registration order, runs every handle exactly once even when some fail,
//! and reports what happened.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use flate2::read::GzDecoder;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

type ReleaseFn = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// A deferred cleanup registered by a body layer.
pub struct ReleaseHandle {
    name: &'static str,
    release: ReleaseFn,
}

impl ReleaseHandle {
    /// Create a handle named `name`.
    pub fn new<F>(name: &'static str, release: F) -> Self
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        Self {
            name,
            release: Box::new(release),
        }
    }

    /// The handle's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseHandle").field(&self.name).finish()
    }
}

/// Outcome of releasing a body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Handles that ran, in the order they ran.
    pub released: Vec<&'static str>,
    /// Handles whose release reported an error.
    pub failures: Vec<(&'static str, String)>,
}

impl ReleaseReport {
    /// Whether every handle released cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A reader whose inner value can be dropped through a release handle.
struct Releasable<R> {
    slot: Arc<Mutex<Option<R>>>,
}

impl<R: Send + 'static> Releasable<R> {
    fn new(inner: R, name: &'static str) -> (Self, ReleaseHandle) {
        let slot = Arc::new(Mutex::new(Some(inner)));
        let handle_slot = Arc::clone(&slot);
        let handle = ReleaseHandle::new(name, move || {
            handle_slot.lock().take();
            Ok(())
        });
        (Self { slot }, handle)
    }
}

impl<R: Read> Read for Releasable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.slot.lock().as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(io::Error::other("body already released")),
        }
    }
}

/// Layered body reader plus its release handles.
pub struct ResponseBody {
    reader: Box<dyn Read + Send>,
    layers: Vec<&'static str>,
    handles: Vec<ReleaseHandle>,
}

impl ResponseBody {
    /// Seed a body with the raw transport reader and its release handle.
    pub fn new(raw: impl Read + Send + 'static, release: ReleaseHandle) -> Self {
        Self {
            reader: Box::new(raw),
            layers: vec![release.name],
            handles: vec![release],
        }
    }

    /// A body with nothing to read and nothing to release.
    pub fn empty() -> Self {
        Self {
            reader: Box::new(io::empty()),
            layers: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Wrap the current reader. `build` receives the current reader and
    /// returns the new one, optionally with a release handle to append.
    ///
    /// On failure every handle registered so far is released before the
    /// error is returned.
    pub fn push_layer<F>(mut self, name: &'static str, build: F) -> NetResult<Self>
    where
        F: FnOnce(Box<dyn Read + Send>) -> io::Result<(Box<dyn Read + Send>, Option<ReleaseHandle>)>,
    {
        let current = std::mem::replace(&mut self.reader, Box::new(io::empty()));
        match build(current) {
            Ok((reader, handle)) => {
                self.reader = reader;
                self.layers.push(name);
                if let Some(handle) = handle {
                    self.handles.push(handle);
                }
                debug!(layer = name, "Response body layer added");
                Ok(self)
            }
            Err(e) => {
                let report = self.release();
                debug!(layer = name, released = ?report.released, "Layer failed, body released");
                Err(NetError::DecodeFailed {
                    layer: name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Names of the layers, innermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    /// Names of the pending release handles, in registration order.
    pub fn pending_handles(&self) -> Vec<&'static str> {
        self.handles.iter().map(ReleaseHandle::name).collect()
    }

    /// Run every pending handle, most recently registered first.
    ///
    /// A failing handle is recorded and logged; the remaining handles still
    /// run. Calling this again returns an empty report.
    pub fn release(&mut self) -> ReleaseReport {
        self.reader = Box::new(io::empty());
        let mut report = ReleaseReport::default();
        while let Some(handle) = self.handles.pop() {
            let name = handle.name;
            if let Err(e) = (handle.release)() {
                warn!(handle = name, error = %e, "Response body release failed");
                report.failures.push((name, e.to_string()));
            }
            report.released.push(name);
        }
        report
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.release();
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("layers", &self.layers)
            .field("handles", &self.handles)
            .finish()
    }
}

/// Decoding layers a response asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLayers {
    /// `Content-Encoding: gzip`.
    pub gzip: bool,
    /// Non-UTF-8 `charset=` in `Content-Type`.
    pub charset: Option<&'static Encoding>,
}

impl DecodeLayers {
    /// Derive layers from the response's `Content-Encoding` and
    /// `Content-Type` values.
    pub fn from_headers(content_encoding: Option<&str>, content_type: Option<&str>) -> Self {
        let gzip = content_encoding.is_some_and(|v| {
            v.split(',')
                .any(|coding| matches!(coding.trim().to_ascii_lowercase().as_str(), "gzip" | "x-gzip"))
        });
        let charset = content_type
            .and_then(charset_label)
            .and_then(|label| match Encoding::for_label(label.as_bytes()) {
                Some(encoding) => Some(encoding),
                None => {
                    debug!(charset = label, "Unknown charset, body left undecoded");
                    None
                }
            })
            .filter(|encoding| *encoding != UTF_8);
        Self { gzip, charset }
    }

    /// Whether no layer applies.
    pub fn is_identity(&self) -> bool {
        !self.gzip && self.charset.is_none()
    }

    /// Apply the layers to `body`: gzip first, then charset transcoding.
    ///
    /// # Errors
    ///
    /// `DecodeFailed` when a layer cannot start; the body has been released.
    pub fn apply(self, mut body: ResponseBody) -> NetResult<ResponseBody> {
        if self.gzip {
            body = body.push_layer("gzip", gzip_layer)?;
        }
        if let Some(encoding) = self.charset {
            body = body.push_layer("charset", move |inner| {
                let decoder = DecodeReaderBytesBuilder::new()
                    .encoding(Some(encoding))
                    .build(inner);
                Ok((Box::new(decoder) as Box<dyn Read + Send>, None))
            })?;
        }
        Ok(body)
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn gzip_layer(
    mut inner: Box<dyn Read + Send>,
) -> io::Result<(Box<dyn Read + Send>, Option<ReleaseHandle>)> {
    let mut magic = [0u8; 2];
    inner.read_exact(&mut magic)?;
    if magic != GZIP_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "body is not gzip encoded",
        ));
    }
    let decoder = GzDecoder::new(io::Cursor::new(magic).chain(inner));
    let (reader, handle) = Releasable::new(decoder, "gzip");
    Ok((Box::new(reader), Some(handle)))
}

fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_body(data: Vec<u8>, released: Arc<AtomicBool>) -> ResponseBody {
        ResponseBody::new(
            io::Cursor::new(data),
            ReleaseHandle::new("transport", move || {
                released.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[test]
    fn test_charset_label() {
        assert_eq!(charset_label("text/html; charset=GBK"), Some("GBK"));
        assert_eq!(charset_label("text/html;Charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(charset_label("text/html"), None);
    }

    #[test]
    fn test_layers_from_headers() {
        let layers = DecodeLayers::from_headers(Some("gzip"), Some("text/plain; charset=GBK"));
        assert!(layers.gzip);
        assert_eq!(layers.charset, Some(encoding_rs::GBK));

        let identity = DecodeLayers::from_headers(None, Some("text/plain; charset=utf-8"));
        assert!(identity.is_identity());

        let unknown = DecodeLayers::from_headers(Some("br"), Some("text/plain; charset=klingon"));
        assert!(unknown.is_identity());
    }

    #[test]
    fn test_gzip_and_gbk_round_trip() {
        let text = "你好，世界 hello";
        let (gbk, _, _) = encoding_rs::GBK.encode(text);
        let released = Arc::new(AtomicBool::new(false));
        let body = raw_body(gzip(&gbk), released.clone());

        let layers = DecodeLayers::from_headers(Some("gzip"), Some("text/html; charset=GBK"));
        let mut body = layers.apply(body).unwrap();
        assert_eq!(body.layers(), &["transport", "gzip", "charset"]);

        let mut decoded = String::new();
        body.read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);

        let report = body.release();
        assert_eq!(report.released, vec!["gzip", "transport"]);
        assert!(report.is_clean());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_gzip_layer_releases_transport() {
        let released = Arc::new(AtomicBool::new(false));
        let body = raw_body(b"plain text".to_vec(), released.clone());

        let layers = DecodeLayers::from_headers(Some("gzip"), None);
        let err = layers.apply(body).unwrap_err();
        assert!(matches!(err, NetError::DecodeFailed { layer: "gzip", .. }));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_release_continues_past_failures() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = |name: &'static str, fail: bool| {
            let order = order.clone();
            ReleaseHandle::new(name, move || {
                order.lock().push(name);
                if fail {
                    Err(io::Error::other("boom"))
                } else {
                    Ok(())
                }
            })
        };

        let mut body = ResponseBody::new(io::empty(), log("transport", false))
            .push_layer("first", |r| Ok((r, Some(log("first", true)))))
            .unwrap()
            .push_layer("second", |r| Ok((r, Some(log("second", false)))))
            .unwrap();

        let report = body.release();
        assert_eq!(*order.lock(), vec!["second", "first", "transport"]);
        assert_eq!(report.failures, vec![("first", "boom".to_string())]);
        assert!(body.release().released.is_empty());
    }

    #[test]
    fn test_drop_releases_once() {
        let released = Arc::new(AtomicBool::new(false));
        drop(raw_body(Vec::new(), released.clone()));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reads_after_release_hit_eof() {
        let released = Arc::new(AtomicBool::new(false));
        let body = raw_body(gzip(b"data"), released);
        let mut body = DecodeLayers::from_headers(Some("gzip"), None)
            .apply(body)
            .unwrap();
        body.release();
        let mut buf = [0u8; 4];
        assert_eq!(body.read(&mut buf).unwrap(), 0);
    }
}
