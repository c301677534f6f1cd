//! Outgoing request description.

use std::fmt;
use std::io::Read;

use bytes::Bytes;
use url::Url;

use crate::error::{NetError, NetResult};

/// Request payload.
pub enum RequestBody {
    /// No body.
    Empty,
    /// A body of known length, sent with `Content-Length`.
    Bytes(Bytes),
    /// A streamed body, sent chunked.
    Stream(Box<dyn Read + Send>),
}

impl RequestBody {
    /// Whether there is anything to send.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(b) => b.is_empty(),
            Self::Stream(_) => false,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

fn upsert(list: &mut Vec<(String, String)>, key: String, value: String, ignore_case: bool) {
    let existing = list.iter_mut().find(|(k, _)| {
        if ignore_case {
            k.eq_ignore_ascii_case(&key)
        } else {
            *k == key
        }
    });
    match existing {
        Some(entry) => entry.1 = value,
        None => list.push((key, value)),
    }
}

/// An HTTP request under construction.
///
/// Header names are unique ignoring case, query keys and cookie names are
/// unique; in every map the last write wins.
///
/// # Example
///
/// ```
/// use warden_net::http::HttpRequest;
///
/// let request = HttpRequest::new("get", "http://example.com/search?lang=en")
///     .unwrap()
///     .query("q", "rust lua")
///     .header("Accept", "text/html")
///     .cookie("session", "abc");
///
/// assert_eq!(request.method(), "GET");
/// assert_eq!(
///     request.target_url().as_str(),
///     "http://example.com/search?lang=en&q=rust+lua"
/// );
/// ```
#[derive(Debug)]
pub struct HttpRequest {
    method: String,
    url: Url,
    content_type: Option<String>,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    body: RequestBody,
}

impl HttpRequest {
    /// Create a request.
    ///
    /// # Errors
    ///
    /// Fails on a malformed method, an unparsable URL, or a scheme other
    /// than `http`/`https`.
    pub fn new(method: &str, url: &str) -> NetResult<Self> {
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(NetError::Protocol(format!("invalid method '{method}'")));
        }
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NetError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(NetError::InvalidUrl(format!("{url}: missing host")));
        }
        Ok(Self {
            method: method.to_ascii_uppercase(),
            url,
            content_type: None,
            headers: Vec::new(),
            query: Vec::new(),
            cookies: Vec::new(),
            body: RequestBody::Empty,
        })
    }

    /// Set a header, replacing any header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.headers, name.into(), value.into(), true);
        self
    }

    /// Set a query parameter. Values are encoded when the URL is built.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.query, key.into(), value.into(), false);
        self
    }

    /// Set a cookie.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        upsert(&mut self.cookies, name.into(), value.into(), false);
        self
    }

    /// Set the content-type hint. An explicit `Content-Type` header wins.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Attach a body of known length.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    /// Attach a streamed body.
    pub fn body_stream(mut self, body: impl Read + Send + 'static) -> Self {
        self.body = RequestBody::Stream(Box::new(body));
        self
    }

    /// The upper-cased method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The URL as given, without merged query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Cookies in insertion order.
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Look up a header ignoring case.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The content type that will be sent, if any.
    pub fn effective_content_type(&self) -> Option<&str> {
        self.header_value("content-type")
            .or(self.content_type.as_deref())
    }

    /// The URL with query parameters merged in. Keys set through
    /// [`query`](Self::query) replace same-named keys already in the URL.
    pub fn target_url(&self) -> Url {
        let mut url = self.url.clone();
        if self.query.is_empty() {
            return url;
        }
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !self.query.iter().any(|(q, _)| q == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().chain(self.query.iter()));
        url
    }

    /// The `Cookie` header value, if any cookies are set.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub(crate) fn take_body(&mut self) -> RequestBody {
        std::mem::replace(&mut self.body, RequestBody::Empty)
    }

    pub(crate) fn body_ref(&self) -> &RequestBody {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_input() {
        assert!(HttpRequest::new("GE T", "http://a").is_err());
        assert!(HttpRequest::new("GET", "ftp://a/b").is_err());
        assert!(HttpRequest::new("GET", "not a url").is_err());
    }

    #[test]
    fn test_headers_are_case_insensitive_last_write_wins() {
        let request = HttpRequest::new("GET", "http://a/")
            .unwrap()
            .header("X-Token", "1")
            .header("x-token", "2");
        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.header_value("X-TOKEN"), Some("2"));
    }

    #[test]
    fn test_query_merge_replaces_existing_keys() {
        let request = HttpRequest::new("GET", "http://a/p?x=1&y=2")
            .unwrap()
            .query("x", "a&b")
            .query("z", "3");
        assert_eq!(request.target_url().as_str(), "http://a/p?y=2&x=a%26b&z=3");
        assert_eq!(request.url().as_str(), "http://a/p?x=1&y=2");
    }

    #[test]
    fn test_content_type_header_wins_over_hint() {
        let request = HttpRequest::new("POST", "http://a/")
            .unwrap()
            .content_type("text/plain");
        assert_eq!(request.effective_content_type(), Some("text/plain"));

        let request = request.header("Content-Type", "application/xml");
        assert_eq!(request.effective_content_type(), Some("application/xml"));
    }

    #[test]
    fn test_cookie_header() {
        let request = HttpRequest::new("GET", "http://a/")
            .unwrap()
            .cookie("a", "1")
            .cookie("b", "2")
            .cookie("a", "3");
        assert_eq!(request.cookie_header().as_deref(), Some("a=3; b=2"));
    }
}
