//! Static header, transport, and origin policies.
//!
//! These run before any credential work: security headers on every response,
//! HTTPS enforcement in production, CORS reflection for allowed origins, and
//! the Referer/Origin presence check on protected paths.

use std::net::SocketAddr;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use spacegate_core::Environment;

/// Headers attached to every response.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", "default-src 'self'"),
    ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
];

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

const CORS_ALLOW_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, \
     Authorization, accept, origin, Cache-Control, X-Requested-With, X-Telegram-Init-Data, \
     X-Telegram-Auth-Type, X-Bot-Token";

const CORS_ALLOW_METHODS: &str = "POST, OPTIONS, GET, PUT, PATCH, DELETE";

const CORS_MAX_AGE: &str = "43200";

// ---------------------------------------------------------------------------
// Response headers
// ---------------------------------------------------------------------------

/// Attach the static security headers.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
}

/// Attach `Strict-Transport-Security` under the production policy.
pub fn apply_hsts(headers: &mut HeaderMap, environment: Environment) {
    if environment.is_production() {
        headers.insert(
            http::header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        );
    }
}

/// The `https://` location a plain-HTTP request must be redirected to.
///
/// Only under the production policy, and only when a proxy reported a
/// non-`https` scheme through `X-Forwarded-Proto`.
#[must_use]
pub fn https_redirect(parts: &http::request::Parts, environment: Environment) -> Option<HeaderValue> {
    if !environment.is_production() {
        return None;
    }
    let proto = header_str(&parts.headers, "x-forwarded-proto")?;
    if proto == "https" {
        return None;
    }
    let host = header_str(&parts.headers, "host")
        .or_else(|| parts.uri.authority().map(http::uri::Authority::as_str))?;
    let path = parts
        .uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    HeaderValue::from_str(&format!("https://{host}{path}")).ok()
}

// ---------------------------------------------------------------------------
// OriginPolicy
// ---------------------------------------------------------------------------

/// Outcome of the Referer/Origin presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefererCheck {
    /// The path or method is exempt.
    Exempt,
    /// Neither header is present. Suspicious but allowed.
    Unattested,
    /// A header matched the allow-set.
    Allowed,
    /// The `Origin` header is present and not allowed.
    OriginRejected(String),
    /// Only a `Referer` is present and it matches no allowed origin.
    RefererRejected,
}

/// The set of trusted origins and the paths exempt from origin checks.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origins: Vec<String>,
    exempt_paths: Vec<String>,
    exempt_prefixes: Vec<String>,
}

impl OriginPolicy {
    /// Create a policy exempting `/health` and everything under `/api/public`.
    #[must_use]
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            allowed_origins,
            exempt_paths: vec!["/health".to_owned()],
            exempt_prefixes: vec!["/api/public".to_owned()],
        }
    }

    /// Replace the exempt exact paths and path prefixes.
    #[must_use]
    pub fn with_exemptions(mut self, paths: Vec<String>, prefixes: Vec<String>) -> Self {
        self.exempt_paths = paths;
        self.exempt_prefixes = prefixes;
        self
    }

    /// Whether `origin` exactly matches an allowed origin.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// Whether `path` bypasses the Referer/Origin check.
    #[must_use]
    pub fn is_exempt_path(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
            || self.exempt_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Attach CORS headers. Only an allowed origin is reflected.
    pub fn apply_cors(&self, request: &HeaderMap, response: &mut HeaderMap) {
        if let Some(origin) = header_str(request, "origin") {
            if self.is_allowed(origin) {
                if let Ok(value) = HeaderValue::from_str(origin) {
                    response.insert(http::header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                    response.insert(
                        http::header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                        HeaderValue::from_static("true"),
                    );
                }
            }
        }
        response.insert(
            http::header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
        response.insert(
            http::header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        response.insert(
            http::header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(CORS_MAX_AGE),
        );
    }

    /// Run the Referer/Origin presence check.
    ///
    /// A request passes when its `Referer` starts with an allowed origin or its
    /// `Origin` equals one.
    #[must_use]
    pub fn check_referer(&self, method: &http::Method, path: &str, headers: &HeaderMap) -> RefererCheck {
        if *method == http::Method::OPTIONS || self.is_exempt_path(path) {
            return RefererCheck::Exempt;
        }

        let referer = header_str(headers, "referer");
        let origin = header_str(headers, "origin");
        if referer.is_none() && origin.is_none() {
            return RefererCheck::Unattested;
        }

        let matched = self.allowed_origins.iter().any(|allowed| {
            referer.is_some_and(|r| r.starts_with(allowed.as_str()))
                || origin.is_some_and(|o| o == allowed)
        });
        if matched {
            return RefererCheck::Allowed;
        }

        match origin {
            Some(origin) => RefererCheck::OriginRejected(origin.to_owned()),
            None => RefererCheck::RefererRejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Client address
// ---------------------------------------------------------------------------

/// The address the rate limiter keys on.
///
/// With `trust_forwarded_for`, the first `X-Forwarded-For` entry wins, then
/// `X-Real-IP`. Otherwise, or when neither is usable, the peer IP is used.
#[must_use]
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = header_str(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded.or_else(|| header_str(headers, "x-real-ip").map(str::trim)) {
            return addr.to_owned();
        }
    }
    peer.map_or_else(|| "unknown".to_owned(), |addr| addr.ip().to_string())
}

/// A header as a non-empty string, if valid.
#[must_use]
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> OriginPolicy {
        OriginPolicy::new(vec![
            "http://localhost:5173".to_owned(),
            "https://app.example.com".to_owned(),
        ])
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn parts(uri: &str, pairs: &[(&'static str, &str)]) -> http::request::Parts {
        let mut builder = http::Request::builder().uri(uri);
        for (name, value) in pairs {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_should_attach_security_headers() {
        let mut map = HeaderMap::new();
        apply_security_headers(&mut map);
        assert_eq!(map.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(map.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(map.len(), SECURITY_HEADERS.len());
    }

    #[test]
    fn test_should_attach_hsts_only_in_production() {
        let mut map = HeaderMap::new();
        apply_hsts(&mut map, Environment::Development);
        assert!(map.get("strict-transport-security").is_none());
        apply_hsts(&mut map, Environment::Production);
        assert_eq!(map.get("strict-transport-security").unwrap(), HSTS);
    }

    #[test]
    fn test_should_redirect_plain_http_in_production() {
        let req = parts(
            "/api/users/me?x=1",
            &[("host", "space.example.com"), ("x-forwarded-proto", "http")],
        );
        assert_eq!(
            https_redirect(&req, Environment::Production).unwrap(),
            "https://space.example.com/api/users/me?x=1"
        );
        assert!(https_redirect(&req, Environment::Development).is_none());

        let secure = parts("/", &[("host", "space.example.com"), ("x-forwarded-proto", "https")]);
        assert!(https_redirect(&secure, Environment::Production).is_none());

        let direct = parts("/", &[("host", "space.example.com")]);
        assert!(https_redirect(&direct, Environment::Production).is_none());
    }

    #[test]
    fn test_should_reflect_only_allowed_origin() {
        let mut response = HeaderMap::new();
        policy().apply_cors(&headers(&[("origin", "http://localhost:5173")]), &mut response);
        assert_eq!(
            response.get("access-control-allow-origin").unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(response.get("access-control-allow-credentials").unwrap(), "true");
        assert_eq!(response.get("access-control-max-age").unwrap(), "43200");

        let mut response = HeaderMap::new();
        policy().apply_cors(&headers(&[("origin", "https://evil.example")]), &mut response);
        assert!(response.get("access-control-allow-origin").is_none());
        assert!(response.get("access-control-allow-methods").is_some());
    }

    #[test]
    fn test_should_not_reflect_origin_prefix() {
        let mut response = HeaderMap::new();
        policy().apply_cors(
            &headers(&[("origin", "http://localhost:5173.evil.example")]),
            &mut response,
        );
        assert!(response.get("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_should_exempt_health_public_and_options() {
        let p = policy();
        let hostile = headers(&[("origin", "https://evil.example")]);
        assert_eq!(p.check_referer(&http::Method::GET, "/health", &hostile), RefererCheck::Exempt);
        assert_eq!(
            p.check_referer(&http::Method::GET, "/api/public/rooms", &hostile),
            RefererCheck::Exempt
        );
        assert_eq!(
            p.check_referer(&http::Method::OPTIONS, "/api/users/me", &hostile),
            RefererCheck::Exempt
        );
    }

    #[test]
    fn test_should_allow_unattested_request() {
        assert_eq!(
            policy().check_referer(&http::Method::GET, "/api/users/me", &HeaderMap::new()),
            RefererCheck::Unattested
        );
    }

    #[test]
    fn test_should_match_referer_by_prefix() {
        let p = policy();
        assert_eq!(
            p.check_referer(
                &http::Method::GET,
                "/api/users/me",
                &headers(&[("referer", "https://app.example.com/rooms/3")])
            ),
            RefererCheck::Allowed
        );
        assert_eq!(
            p.check_referer(
                &http::Method::GET,
                "/api/users/me",
                &headers(&[("referer", "https://other.example/")])
            ),
            RefererCheck::RefererRejected
        );
    }

    #[test]
    fn test_should_match_origin_exactly() {
        let p = policy();
        assert_eq!(
            p.check_referer(
                &http::Method::POST,
                "/api/users/me",
                &headers(&[("origin", "https://app.example.com")])
            ),
            RefererCheck::Allowed
        );
        assert_eq!(
            p.check_referer(
                &http::Method::POST,
                "/api/users/me",
                &headers(&[("origin", "https://app.example.com.evil")])
            ),
            RefererCheck::OriginRejected("https://app.example.com.evil".to_owned())
        );
    }

    #[test]
    fn test_should_pick_client_address() {
        let peer: SocketAddr = "192.0.2.10:50000".parse().unwrap();
        let forwarded = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
            ("x-real-ip", "203.0.113.9"),
        ]);
        assert_eq!(client_address(&forwarded, Some(peer), false), "192.0.2.10");
        assert_eq!(client_address(&forwarded, Some(peer), true), "203.0.113.5");
        assert_eq!(
            client_address(&headers(&[("x-real-ip", "203.0.113.9")]), Some(peer), true),
            "203.0.113.9"
        );
        assert_eq!(client_address(&HeaderMap::new(), Some(peer), true), "192.0.2.10");
        assert_eq!(client_address(&HeaderMap::new(), None, false), "unknown");
    }
}
