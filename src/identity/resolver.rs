//! Visitor identity resolution.
//!
//! `strict` mode identifies visitors by address. `reduced` mode identifies
//! them by a self-issued token stored in a script-readable cookie, so the
//! site never keys anything on the visitor's IP.

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use super::cookie::{CookieDirective, SameSitePolicy};
use super::request::RequestMeta;
use super::token::{TOKEN_LIFETIME, TokenOrigin, VisitorToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    #[default]
    Strict,
    Reduced,
}

/// Where and how visitor cookies are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub path: String,
    pub alt_path: Option<String>,
    pub domain: Option<String>,
    /// Force `Secure` even on plain-HTTP requests.
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "modreel_visitor".to_string(),
            path: "/".to_string(),
            alt_path: None,
            domain: None,
            secure: false,
        }
    }
}

/// Per-request identity state.
///
/// Memoizes the resolved token and collects cookie directives for the caller
/// to apply to its response.
#[derive(Debug, Default)]
pub struct VisitorScope {
    token: Option<VisitorToken>,
    headers_sent: bool,
    pending: Vec<CookieDirective>,
}

impl VisitorScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that response headers are flushed; later mints become ephemeral.
    pub fn mark_headers_sent(&mut self) {
        self.headers_sent = true;
    }

    pub fn pending_cookies(&self) -> &[CookieDirective] {
        &self.pending
    }

    pub fn take_cookies(&mut self) -> Vec<CookieDirective> {
        std::mem::take(&mut self.pending)
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> Option<&VisitorToken> {
        self.token.as_ref()
    }
}

/// Outcome of the pure token decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenDecision {
    Reuse(VisitorToken),
    Mint(VisitorToken),
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    mode: SecurityMode,
    cookie: CookieSettings,
}

impl IdentityResolver {
    pub fn new(mode: SecurityMode, cookie: CookieSettings) -> Self {
        Self { mode, cookie }
    }

    /// The identifier this request is known by.
    pub fn resolve(&self, request: &RequestMeta, scope: &mut VisitorScope) -> String {
        match self.mode {
            SecurityMode::Strict => request.client_ip(),
            SecurityMode::Reduced => self.visitor_token(request, scope).value,
        }
    }

    /// Resolve the reduced-mode token, issuing a cookie when one is minted.
    pub fn visitor_token(&self, request: &RequestMeta, scope: &mut VisitorScope) -> VisitorToken {
        if let Some(token) = &scope.token {
            return token.clone();
        }

        let existing = request.cookie(&self.cookie.name);
        let token = match self.resolve_token(existing.as_deref(), request.now) {
            TokenDecision::Reuse(token) => token,
            TokenDecision::Mint(token) if scope.headers_sent => {
                debug!(
                    target = "modreel::identity",
                    op = "visitor_token",
                    result = "ephemeral",
                    "headers already sent, using in-memory token"
                );
                VisitorToken::ephemeral(token.issued_at)
            }
            TokenDecision::Mint(token) => {
                let directives = self.issue(&token, request.https);
                scope.pending.extend(directives);
                token
            }
        };

        scope.token = Some(token.clone());
        token
    }

    /// Decide which token the visitor carries, without side effects.
    pub fn resolve_token(&self, existing_cookie: Option<&str>, now: OffsetDateTime) -> TokenDecision {
        match existing_cookie.and_then(|value| VisitorToken::from_cookie(value, now)) {
            Some(token) => TokenDecision::Reuse(token),
            None => TokenDecision::Mint(VisitorToken::mint(now)),
        }
    }

    /// Cookie directives that persist `token`: one per configured path.
    pub fn issue(&self, token: &VisitorToken, https: bool) -> Vec<CookieDirective> {
        if token.origin == TokenOrigin::Ephemeral {
            return Vec::new();
        }

        let mut paths = vec![self.cookie.path.clone()];
        if let Some(alt) = &self.cookie.alt_path
            && *alt != self.cookie.path
        {
            paths.push(alt.clone());
        }

        paths
            .into_iter()
            .map(|path| CookieDirective {
                name: self.cookie.name.clone(),
                value: token.value.clone(),
                expires: token.issued_at + TOKEN_LIFETIME,
                max_age: TOKEN_LIFETIME,
                path,
                domain: self.cookie.domain.clone(),
                secure: self.cookie.secure || https,
                same_site: SameSitePolicy::Lax,
                http_only: false,
            })
            .collect()
    }
}
