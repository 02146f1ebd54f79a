use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use http::{Method, StatusCode};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub headers: HeaderMap,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::SameOrigin,
            headers: HeaderMap::new(),
        }
    }

    /// A top-level document load
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url);
        request.mode = RequestMode::Navigate;
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/html"));
        request
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("text/html"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after any redirects
    pub url: Url,
    pub redirected: bool,
}

impl Response {
    pub fn new(status: StatusCode, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url,
            redirected: false,
        }
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// Only successful responses that were not redirected may be stored
    pub fn is_cacheable(&self) -> bool {
        self.is_ok() && !self.redirected
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// How a request is answered by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted; the network answers and nothing is cached.
    PassThrough,
    NetworkFirst,
    CacheFirst,
}

pub fn classify(request: &Request, scope: &Url) -> Strategy {
    if request.method != Method::GET || request.url.origin() != scope.origin() {
        return Strategy::PassThrough;
    }

    if request.mode == RequestMode::Navigate || request.accepts_html() {
        Strategy::NetworkFirst
    } else {
        Strategy::CacheFirst
    }
}
