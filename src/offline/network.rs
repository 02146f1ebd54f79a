use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use url::Url;

use super::request::{Request, Response};

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    Unreachable(String),

    #[error("fetch failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// HTTP client backed network
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("resonant/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let resp = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    FetchError::Unreachable(e.to_string())
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let url = resp.url().clone();
        let redirected = without_fragment(&url) != without_fragment(&request.url);
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Response {
            status,
            headers,
            body,
            url,
            redirected,
        })
    }
}

#[derive(Debug, Clone)]
enum Route {
    Body {
        status: StatusCode,
        body: Bytes,
        content_type: Option<&'static str>,
    },
    Redirect(String),
}

/// In-memory origin for tests and offline demos. Paths map to canned
/// responses, unknown paths answer 404, and the whole origin can be taken
/// offline.
#[derive(Debug)]
pub struct ScriptedNetwork {
    origin: Url,
    online: AtomicBool,
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl ScriptedNetwork {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            online: AtomicBool::new(true),
            routes: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn route(&self, path: &str, route: Route) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(path.to_string(), route);
        }
    }

    pub fn serve(&self, path: &str, body: impl Into<Bytes>) {
        self.serve_status(path, StatusCode::OK, body);
    }

    pub fn serve_typed(&self, path: &str, content_type: &'static str, body: impl Into<Bytes>) {
        self.route(
            path,
            Route::Body {
                status: StatusCode::OK,
                body: body.into(),
                content_type: Some(content_type),
            },
        );
    }

    pub fn serve_status(&self, path: &str, status: StatusCode, body: impl Into<Bytes>) {
        self.route(
            path,
            Route::Body {
                status,
                body: body.into(),
                content_type: None,
            },
        );
    }

    pub fn redirect(&self, path: &str, to: &str) {
        self.route(path, Route::Redirect(to.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of requests that reached the origin for `path`
    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .map(|h| h.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn lookup(&self, path: &str) -> Option<Route> {
        self.routes.lock().ok().and_then(|r| r.get(path).cloned())
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if !self.is_online() {
            return Err(FetchError::Unreachable(request.url.to_string()));
        }
        if request.url.origin() != self.origin.origin() {
            return Err(FetchError::Unreachable(request.url.to_string()));
        }

        let path = request.url.path().to_string();
        if let Ok(mut hits) = self.hits.lock() {
            *hits.entry(path.clone()).or_insert(0) += 1;
        }

        let (route, url, redirected) = match self.lookup(&path) {
            Some(Route::Redirect(to)) => {
                let target = self
                    .origin
                    .join(&to)
                    .map_err(|e| FetchError::Transport(e.to_string()))?;
                (self.lookup(target.path()), target, true)
            }
            other => (other, request.url.clone(), false),
        };

        let response = match route {
            Some(Route::Body {
                status,
                body,
                content_type,
            }) => {
                let resp = Response::new(status, url, body);
                match content_type {
                    Some(ct) => resp.with_content_type(ct),
                    None => resp,
                }
            }
            _ => Response::new(StatusCode::NOT_FOUND, url, "not found"),
        };

        Ok(Response {
            redirected,
            ..response
        })
    }
}
