//! Cache-first routing decision.
//!
//! [`decide`] holds the whole fetch policy and never touches a cache or the
//! network; the gatekeeper calls it once before fetching and once after.

use http::{Method, StatusCode};
use solar_net::{NetError, OriginPolicy, Request, RequestScope, Response, ResponseType};

/// What the routing policy needs to know about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMeta {
    pub scope: RequestScope,
    /// Only GET requests are looked up or stored.
    pub is_get: bool,
    /// Full document navigation.
    pub navigation: bool,
}

impl RequestMeta {
    /// Describe a request under an origin policy.
    pub fn of(request: &Request, policy: &OriginPolicy) -> Self {
        Self {
            scope: policy.scope(&request.url),
            is_get: request.method == Method::GET,
            navigation: request.is_navigation(),
        }
    }
}

/// Result of the cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

/// Result of the network fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkOutcome {
    /// A response arrived, whatever its status.
    Response {
        status: StatusCode,
        response_type: ResponseType,
    },
    /// No response at all.
    Failed,
}

impl NetworkOutcome {
    /// Summarise a fetch result.
    pub fn of(result: &Result<Response, NetError>) -> Self {
        match result {
            Ok(response) => Self::Response {
                status: response.status,
                response_type: response.response_type,
            },
            Err(_) => Self::Failed,
        }
    }
}

/// Which offline payload to synthesise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// HTML page for failed navigations.
    Document,
    /// Plain-text message for everything else.
    Text,
}

impl FallbackKind {
    /// Offline payload for a request that got no response.
    pub fn for_request(meta: &RequestMeta) -> Self {
        if meta.navigation {
            Self::Document
        } else {
            Self::Text
        }
    }
}

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Not ours: let the platform handle it untouched.
    PassThrough,
    /// Answer with the stored response.
    ServeCached,
    /// Go to the network.
    Fetch,
    /// Return the network response and store a copy in the background.
    StoreAndRespond,
    /// Return the network response as-is.
    Respond,
    /// Network failed; answer with a static offline response.
    Fallback(FallbackKind),
}

/// Route a request. `network` is `None` until the network has been consulted.
pub fn decide(
    meta: &RequestMeta,
    lookup: CacheLookup,
    network: Option<NetworkOutcome>,
) -> Action {
    if !meta.scope.is_interceptable() || !meta.is_get {
        return Action::PassThrough;
    }

    if lookup == CacheLookup::Hit {
        return Action::ServeCached;
    }

    match network {
        None => Action::Fetch,
        Some(NetworkOutcome::Response {
            status,
            response_type: ResponseType::Basic,
        }) if status == StatusCode::OK => Action::StoreAndRespond,
        Some(NetworkOutcome::Response { .. }) => Action::Respond,
        Some(NetworkOutcome::Failed) => Action::Fallback(FallbackKind::for_request(meta)),
    }
}
