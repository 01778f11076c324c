//! Origin scoping: which requests the worker may intercept.

use tracing::trace;
use url::{Origin, Url};

/// Third-party host allowed by substring, e.g. a CDN hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern(String);

impl HostPattern {
    pub fn new(host: impl Into<String>) -> Self {
        Self(host.into())
    }

    /// Matches on the host only; a path mentioning the host does not count.
    pub fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| host.contains(&self.0))
    }
}

/// Where a request points, relative to the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    /// Same scheme, host and port as the site.
    SameOrigin,
    /// Third-party origin on the allow-list.
    AllowListed,
    /// Anything else; never intercepted.
    Foreign,
}

impl RequestScope {
    /// Whether the worker may answer or cache this request.
    pub fn is_interceptable(self) -> bool {
        !matches!(self, RequestScope::Foreign)
    }
}

/// The site origin plus the third-party hosts the worker is allowed to cache.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    site: Origin,
    allowed: Vec<HostPattern>,
}

impl OriginPolicy {
    /// Create a policy for a site with no third-party hosts allowed.
    pub fn new(site: &Url) -> Self {
        Self {
            site: site.origin(),
            allowed: Vec::new(),
        }
    }

    /// Allow every host containing one of the given substrings.
    pub fn allow_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.extend(hosts.into_iter().map(HostPattern::new));
        self
    }

    /// Classify a URL.
    pub fn scope(&self, url: &Url) -> RequestScope {
        let scope = if url.origin() == self.site {
            RequestScope::SameOrigin
        } else if self.allowed.iter().any(|p| p.matches(url)) {
            RequestScope::AllowListed
        } else {
            RequestScope::Foreign
        };
        trace!(url = %url, scope = ?scope, "Scoped request");
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_contains_ignores_path() {
        let pattern = HostPattern::new("cdnjs.cloudflare.com");
        assert!(pattern.matches(&url(
            "https://cdnjs.cloudflare.com/ajax/libs/three.js/r128/three.min.js"
        )));
        assert!(!pattern.matches(&url(
            "https://evil.example/cdnjs.cloudflare.com/three.min.js"
        )));
    }

    #[test]
    fn test_policy_scopes() {
        let policy = OriginPolicy::new(&url("http://localhost:8080/"))
            .allow_hosts(["cdnjs.cloudflare.com"]);

        assert_eq!(
            policy.scope(&url("http://localhost:8080/index.html")),
            RequestScope::SameOrigin
        );
        assert_eq!(
            policy.scope(&url("https://cdnjs.cloudflare.com/x.js")),
            RequestScope::AllowListed
        );
        assert_eq!(
            policy.scope(&url("https://fonts.example/font.woff2")),
            RequestScope::Foreign
        );
        // Different port is a different origin.
        assert_eq!(
            policy.scope(&url("http://localhost:9090/index.html")),
            RequestScope::Foreign
        );
    }

    #[test]
    fn test_interceptable() {
        assert!(RequestScope::SameOrigin.is_interceptable());
        assert!(RequestScope::AllowListed.is_interceptable());
        assert!(!RequestScope::Foreign.is_interceptable());
    }
}
