use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Lifetime of an issued visitor token.
pub const TOKEN_LIFETIME: Duration = Duration::days(365);
pub const EPHEMERAL_PREFIX: &str = "anon_";
const MIN_TOKEN_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Accepted from the visitor's cookie.
    Cookie,
    /// Newly minted; a cookie directive was issued for it.
    Minted,
    /// Minted after headers were flushed; lives only for this scope.
    Ephemeral,
}

/// A pseudonymous visitor identifier used in reduced-privacy mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorToken {
    pub value: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub origin: TokenOrigin,
}

impl VisitorToken {
    fn new(value: String, now: OffsetDateTime, origin: TokenOrigin) -> Self {
        Self {
            value,
            issued_at: now,
            expires_at: now + TOKEN_LIFETIME,
            origin,
        }
    }

    /// Accept a cookie value only if it matches `^[A-Za-z0-9-]{10,}$`.
    pub fn from_cookie(value: &str, now: OffsetDateTime) -> Option<Self> {
        is_valid_token(value).then(|| Self::new(value.to_string(), now, TokenOrigin::Cookie))
    }

    pub fn mint(now: OffsetDateTime) -> Self {
        Self::new(Uuid::new_v4().to_string(), now, TokenOrigin::Minted)
    }

    pub fn ephemeral(now: OffsetDateTime) -> Self {
        let value = format!("{EPHEMERAL_PREFIX}{}", Uuid::new_v4().simple());
        Self::new(value, now, TokenOrigin::Ephemeral)
    }

    pub fn is_persistent(&self) -> bool {
        self.origin != TokenOrigin::Ephemeral
    }
}

pub fn is_valid_token(value: &str) -> bool {
    value.len() >= MIN_TOKEN_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
}
