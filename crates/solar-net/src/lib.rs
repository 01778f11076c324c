//! # Solar Net
//!
//! Request/response model and network access for the Solar System offline worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch seam**: the worker only talks to the network through [`Fetcher`],
//!    so tests can script network outcomes.
//! 2. **Response classification**: every response carries a [`ResponseType`]
//!    (`basic`, `cors`, `opaque`) computed from the site origin and redirects.
//! 3. **Origin scoping**: [`OriginPolicy`] decides which requests the worker may
//!    intercept at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};
use url::{Position, Url};

pub mod origin;

pub use origin::{HostPattern, OriginPolicy, RequestScope};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cross-origin request refused in same-origin mode: {0}")]
    CrossOrigin(Url),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, mirroring the fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Cross-origin requests are refused before hitting the network.
    SameOrigin,
    /// Cross-origin responses come back opaque.
    #[default]
    NoCors,
    /// Cross-origin responses are exposed as `cors`.
    Cors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::NoCors,
        }
    }

    /// Create a document navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url)
            .mode(RequestMode::Navigate)
            .header(http::header::ACCEPT, HeaderValue::from_static("text/html"))
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this request loads a full document.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Response classification, as exposed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin, non-redirected.
    Basic,
    /// Cross-origin (or redirected) and readable.
    Cors,
    /// Cross-origin no-cors; contents must not be trusted.
    Opaque,
    /// Synthesised by the worker itself.
    Default,
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL, absent for synthesised responses.
    pub url: Option<Url>,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create a response with an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            url: None,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            response_type: ResponseType::Default,
            redirected: false,
            body: Bytes::new(),
        }
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the final URL.
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Set the response classification.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Content-Type header, if present and valid ASCII.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

/// Anything that can turn a request into a response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue the request. `Err` means no response at all (offline, DNS, refused).
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Origin of the site the worker serves; decides `basic` vs `cors`/`opaque`.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Optional per-request timeout. `None` leaves reqwest's default.
    pub timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Enable cookies.
    pub cookies_enabled: bool,
}

impl LoaderConfig {
    /// Default configuration for a given site origin.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            user_agent: format!("SolarSW/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "he-IL,he;q=0.9,en;q=0.8".to_string(),
            timeout: None,
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// reqwest-backed [`Fetcher`].
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .cookie_store(config.cookies_enabled);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %config.origin, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// The site origin responses are classified against.
    pub fn origin(&self) -> &Url {
        &self.config.origin
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.origin() == self.config.origin.origin()
    }

    /// Classify a completed fetch.
    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        let redirected = was_redirected(&request.url, final_url);
        let same_origin = self.same_origin(&request.url) && self.same_origin(final_url);

        match (same_origin, redirected, request.mode) {
            (true, false, _) => ResponseType::Basic,
            (true, true, _) => ResponseType::Cors,
            (false, _, RequestMode::NoCors) => ResponseType::Opaque,
            (false, _, _) => ResponseType::Cors,
        }
    }
}

/// Whether the final URL differs from the requested one. The fragment is never
/// sent, so the client drops it from the final URL.
fn was_redirected(requested: &Url, final_url: &Url) -> bool {
    requested[..Position::AfterQuery] != final_url[..Position::AfterQuery]
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, mode = ?request.mode, "Fetching resource");

        if request.mode == RequestMode::SameOrigin && !self.same_origin(&request.url) {
            return Err(NetError::CrossOrigin(request.url));
        }

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        let response = req_builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        let response_type = self.classify(&request, &url);
        let redirected = was_redirected(&request.url, &url);

        trace!(
            url = %url,
            status = %status,
            response_type = ?response_type,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            url: Some(url),
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            response_type,
            redirected,
            body,
        })
    }
}
