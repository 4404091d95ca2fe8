//! Visitor identity and request fingerprinting.

mod cookie;
pub mod fingerprint;
mod request;
mod resolver;
mod token;

pub use cookie::{CookieDirective, SameSitePolicy};
pub use fingerprint::{
    FingerprintEngine, FingerprintError, RateLimitFingerprint, SaltKey, compute_digest,
    sanitize_user_agent,
};
pub use request::{RequestMeta, UNKNOWN};
pub use resolver::{CookieSettings, IdentityResolver, SecurityMode, TokenDecision, VisitorScope};
pub use token::{TOKEN_LIFETIME, TokenOrigin, VisitorToken, is_valid_token};
