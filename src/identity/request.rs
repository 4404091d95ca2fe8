//! Request metadata consumed by identity resolution and fingerprinting.

use std::net::SocketAddr;

use axum::http::{HeaderMap, header};
use axum_extra::extract::cookie::CookieJar;
use time::OffsetDateTime;

pub const UNKNOWN: &str = "unknown";

const CF_CONNECTING_IP: &str = "cf-connecting-ip";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// What the identity layer needs to know about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub https: bool,
    pub now: OffsetDateTime,
}

impl RequestMeta {
    pub fn new(headers: HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        let https = headers
            .get(X_FORWARDED_PROTO)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"));
        Self {
            headers,
            remote_addr,
            https,
            now: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = self.https || https;
        self
    }

    pub fn at(mut self, now: OffsetDateTime) -> Self {
        self.now = now;
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Client address, honouring proxy headers in fixed precedence.
    ///
    /// Returns the first non-empty candidate, or `"unknown"`.
    pub fn client_ip(&self) -> String {
        let forwarded_first = self
            .header(X_FORWARDED_FOR)
            .and_then(|value| value.split(',').next());
        let remote = self.remote_addr.map(|addr| addr.ip().to_string());

        [
            self.header(CF_CONNECTING_IP),
            forwarded_first,
            self.header(X_REAL_IP),
            remote.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(header::USER_AGENT.as_str())
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        CookieJar::from_headers(&self.headers)
            .get(name)
            .map(|cookie| cookie.value().to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn meta(pairs: &[(&'static str, &'static str)], remote: Option<&str>) -> RequestMeta {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        RequestMeta::new(headers, remote.map(|addr| addr.parse().expect("socket addr")))
    }

    #[test]
    fn cdn_header_takes_precedence() {
        let request = meta(
            &[
                ("cf-connecting-ip", " 203.0.113.9 "),
                ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
                ("x-real-ip", "192.0.2.4"),
            ],
            Some("127.0.0.1:5000"),
        );
        assert_eq!(request.client_ip(), "203.0.113.9");
    }

    #[test]
    fn forwarded_for_uses_first_entry() {
        let request = meta(
            &[
                ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
                ("x-real-ip", "192.0.2.4"),
            ],
            None,
        );
        assert_eq!(request.client_ip(), "198.51.100.1");
    }

    #[test]
    fn blank_headers_fall_through_to_connection() {
        let request = meta(
            &[("cf-connecting-ip", "   "), ("x-forwarded-for", " , 10.0.0.1")],
            Some("192.0.2.77:443"),
        );
        assert_eq!(request.client_ip(), "192.0.2.77");
    }

    #[test]
    fn no_source_yields_unknown() {
        assert_eq!(meta(&[], None).client_ip(), UNKNOWN);
    }

    #[test]
    fn reads_named_cookie_and_proto() {
        let request = meta(
            &[
                ("cookie", "theme=dark; modreel_visitor=abc-123-def-456"),
                ("x-forwarded-proto", "HTTPS"),
            ],
            None,
        );
        assert_eq!(
            request.cookie("modreel_visitor").as_deref(),
            Some("abc-123-def-456")
        );
        assert!(request.cookie("missing").is_none());
        assert!(request.https);
    }
}
