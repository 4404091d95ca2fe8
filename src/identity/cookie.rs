//! Outgoing cookie directives.

use axum::http::HeaderValue;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSitePolicy {
    Lax,
    Strict,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// A cookie the caller should set on its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDirective {
    pub name: String,
    pub value: String,
    pub expires: OffsetDateTime,
    pub max_age: Duration,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    pub http_only: bool,
}

impl CookieDirective {
    pub fn to_cookie(&self) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.path.clone())
            .expires(self.expires)
            .max_age(self.max_age)
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site.into());
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    /// Render as a `Set-Cookie` header value.
    pub fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.to_cookie().to_string()).ok()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn renders_script_readable_lax_cookie() {
        let directive = CookieDirective {
            name: "modreel_visitor".to_string(),
            value: "0f8c2e1a-5b77-4c1e-9d7e-3a2b1c0d9e8f".to_string(),
            expires: datetime!(2027-01-01 00:00 UTC),
            max_age: Duration::days(365),
            path: "/".to_string(),
            domain: Some("example.org".to_string()),
            secure: true,
            same_site: SameSitePolicy::Lax,
            http_only: false,
        };

        let rendered = directive.to_cookie().to_string();
        assert!(rendered.starts_with("modreel_visitor=0f8c2e1a-5b77-4c1e-9d7e-3a2b1c0d9e8f"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("Domain=example.org"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("Max-Age=31536000"));
        assert!(!rendered.contains("HttpOnly"));
        assert!(directive.header_value().is_some());
    }
}
