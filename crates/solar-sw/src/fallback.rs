//! Static offline responses.

use http::{header, HeaderValue, StatusCode};
use solar_net::{Response, ResponseType};

use crate::config::OfflineContent;
use crate::policy::FallbackKind;

/// Content-Type of the navigation fallback.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
/// Content-Type of every other fallback.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Build the 503 answer for a request the network could not serve.
pub fn offline_response(kind: FallbackKind, content: &OfflineContent) -> Response {
    let (content_type, body) = match kind {
        FallbackKind::Document => (HTML_CONTENT_TYPE, content.html.clone()),
        FallbackKind::Text => (TEXT_CONTENT_TYPE, content.text.clone()),
    };

    let mut response = Response::new(StatusCode::SERVICE_UNAVAILABLE)
        .with_type(ResponseType::Default)
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
        .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
        .with_body(body);

    if let Ok(lang) = HeaderValue::from_str(&content.lang) {
        response.headers.insert(header::CONTENT_LANGUAGE, lang);
    }
    response
}
