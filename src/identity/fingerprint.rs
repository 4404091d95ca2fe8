//! Time-bucketed, HMAC-salted request fingerprints for rate limiting.
//!
//! ```text
//! salt   = hex(HMAC-SHA256(site_secret, namespace | bucket_size | bucket))
//! digest = hex(SHA256(identity | user_agent | salt))
//! ```
//!
//! The digest rotates with the bucket, and cannot be precomputed without the
//! site secret.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::request::{RequestMeta, UNKNOWN};
use super::resolver::{IdentityResolver, VisitorScope};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BUCKET_SECONDS: i64 = 60;
const USER_AGENT_MAX_CHARS: usize = 190;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("site secret must not be empty")]
    EmptySecret,
    #[error("site secret rejected by HMAC: {0}")]
    InvalidKey(String),
}

/// HMAC key derived from the site secret.
#[derive(Clone)]
pub struct SaltKey {
    mac: HmacSha256,
}

impl SaltKey {
    pub fn new(secret: &[u8]) -> Result<Self, FingerprintError> {
        if secret.is_empty() {
            return Err(FingerprintError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|err| FingerprintError::InvalidKey(err.to_string()))?;
        Ok(Self { mac })
    }

    fn salt(&self, namespace: &str, bucket_size: i64, bucket: i64) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{namespace}|{bucket_size}|{bucket}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for SaltKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SaltKey(..)")
    }
}

/// Inputs and output of one fingerprint computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitFingerprint {
    pub namespace: String,
    pub identity: String,
    pub user_agent: String,
    pub bucket_size: i64,
    pub time_bucket: i64,
    pub digest: String,
}

/// Compute a fingerprint from explicit inputs. `bucket_size` is clamped to at
/// least one second.
pub fn compute_digest(
    key: &SaltKey,
    namespace: &str,
    identity: &str,
    user_agent: &str,
    timestamp: i64,
    bucket_size: i64,
) -> RateLimitFingerprint {
    let bucket_size = bucket_size.max(1);
    let time_bucket = timestamp.div_euclid(bucket_size);
    let salt = key.salt(namespace, bucket_size, time_bucket);

    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hasher.update(b"|");
    hasher.update(salt.as_bytes());

    RateLimitFingerprint {
        namespace: namespace.to_string(),
        identity: identity.to_string(),
        user_agent: user_agent.to_string(),
        bucket_size,
        time_bucket,
        digest: hex::encode(hasher.finalize()),
    }
}

/// Strip markup, trim, and bound the user-agent; `"unknown"` when empty.
///
/// Text passes through literally: entities are decoded before the length
/// bound applies.
pub fn sanitize_user_agent(raw: Option<&str>) -> String {
    let stripped = raw
        .map(|value| unescape_text(&ammonia::Builder::empty().clean(value).to_string()))
        .unwrap_or_default();
    let bounded: String = stripped.trim().chars().take(USER_AGENT_MAX_CHARS).collect();
    if bounded.is_empty() {
        UNKNOWN.to_string()
    } else {
        bounded
    }
}

/// Reverse the escaping ammonia's serializer applies to text nodes.
///
/// With no tags allowed the cleaned output is a single text run, and the
/// serializer only escapes these four characters there. `&amp;` goes last so
/// an escaped entity name is not decoded twice.
fn unescape_text(escaped: &str) -> String {
    escaped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    key: SaltKey,
    default_bucket: i64,
    resolver: Arc<IdentityResolver>,
}

impl FingerprintEngine {
    pub fn new(key: SaltKey, default_bucket: i64, resolver: Arc<IdentityResolver>) -> Self {
        let default_bucket = if default_bucket > 0 {
            default_bucket
        } else {
            DEFAULT_BUCKET_SECONDS
        };
        Self {
            key,
            default_bucket,
            resolver,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Fingerprint this request within `namespace`.
    ///
    /// `timestamp` defaults to the request time and `bucket_size` to the
    /// configured bucket when unset or non-positive.
    pub fn fingerprint(
        &self,
        request: &RequestMeta,
        scope: &mut VisitorScope,
        namespace: &str,
        timestamp: Option<i64>,
        bucket_size: Option<i64>,
    ) -> RateLimitFingerprint {
        let identity = self.resolver.resolve(request, scope);
        self.fingerprint_identity(&identity, request, namespace, timestamp, bucket_size)
    }

    /// Same as [`Self::fingerprint`], for an identity already resolved earlier
    /// in the request.
    pub fn fingerprint_identity(
        &self,
        identity: &str,
        request: &RequestMeta,
        namespace: &str,
        timestamp: Option<i64>,
        bucket_size: Option<i64>,
    ) -> RateLimitFingerprint {
        let user_agent = sanitize_user_agent(request.user_agent());
        let timestamp = timestamp
            .filter(|ts| *ts > 0)
            .unwrap_or_else(|| request.now.unix_timestamp());
        let bucket_size = bucket_size
            .filter(|size| *size > 0)
            .unwrap_or(self.default_bucket);

        compute_digest(
            &self.key,
            namespace,
            identity,
            &user_agent,
            timestamp,
            bucket_size,
        )
    }

    /// A digest that never rotates, used to recognise the same reporter across
    /// buckets.
    pub fn stable_digest(&self, identity: &str, request: &RequestMeta, namespace: &str) -> String {
        let user_agent = sanitize_user_agent(request.user_agent());
        compute_digest(&self.key, namespace, identity, &user_agent, 0, 1).digest
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};
    use time::macros::datetime;

    use super::*;
    use crate::identity::resolver::{CookieSettings, SecurityMode};

    const T: i64 = 1_700_000_040; // a multiple of 60

    fn key() -> SaltKey {
        SaltKey::new(b"site-secret").expect("valid key")
    }

    fn engine(mode: SecurityMode) -> FingerprintEngine {
        let resolver = Arc::new(IdentityResolver::new(mode, CookieSettings::default()));
        FingerprintEngine::new(key(), DEFAULT_BUCKET_SECONDS, resolver)
    }

    fn request() -> RequestMeta {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.10"));
        headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0 (X11)"));
        RequestMeta::new(headers, None).at(datetime!(2023-11-14 22:14:00 UTC))
    }

    #[test]
    fn identical_inputs_give_identical_digests() {
        let a = compute_digest(&key(), "download", "192.0.2.10", "ua", T, 60);
        let b = compute_digest(&key(), "download", "192.0.2.10", "ua", T, 60);
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn bucket_boundary_controls_rotation() {
        let base = compute_digest(&key(), "download", "id", "ua", T, 60);
        let same = compute_digest(&key(), "download", "id", "ua", T + 59, 60);
        let next = compute_digest(&key(), "download", "id", "ua", T + 60, 60);

        assert_eq!(base.time_bucket, same.time_bucket);
        assert_eq!(base.digest, same.digest);
        assert_ne!(base.digest, next.digest);
    }

    #[test]
    fn every_input_feeds_the_digest() {
        let base = compute_digest(&key(), "download", "id", "ua", T, 60).digest;
        let other_key = SaltKey::new(b"other-secret").expect("valid key");
        assert_ne!(base, compute_digest(&other_key, "download", "id", "ua", T, 60).digest);
        assert_ne!(base, compute_digest(&key(), "report", "id", "ua", T, 60).digest);
        assert_ne!(base, compute_digest(&key(), "download", "id2", "ua", T, 60).digest);
        assert_ne!(base, compute_digest(&key(), "download", "id", "ua2", T, 60).digest);
        assert_ne!(base, compute_digest(&key(), "download", "id", "ua", T, 120).digest);
    }

    #[test]
    fn digest_matches_reference_construction() {
        let mut mac = HmacSha256::new_from_slice(b"site-secret").expect("hmac key");
        mac.update(format!("download|60|{}", T / 60).as_bytes());
        let salt = hex::encode(mac.finalize().into_bytes());
        let expected = hex::encode(Sha256::digest(format!("id|ua|{salt}").as_bytes()));

        assert_eq!(
            compute_digest(&key(), "download", "id", "ua", T, 60).digest,
            expected
        );
    }

    #[test]
    fn user_agent_text_passes_through_literally() {
        assert_eq!(
            sanitize_user_agent(Some("Foo & Bar <b>x</b> \"q\" 1<2")),
            "Foo & Bar x \"q\" 1<2"
        );
        assert_eq!(sanitize_user_agent(Some("a &lt; b &amp;amp; c")), "a < b &amp; c");
    }

    #[test]
    fn user_agent_bound_counts_literal_characters() {
        let ampersands = "&".repeat(100);
        assert_eq!(sanitize_user_agent(Some(&ampersands)), ampersands);

        let long = "&".repeat(300);
        assert_eq!(sanitize_user_agent(Some(&long)), "&".repeat(190));
    }

    #[test]
    fn user_agent_is_stripped_and_bounded() {
        assert_eq!(sanitize_user_agent(None), UNKNOWN);
        assert_eq!(sanitize_user_agent(Some("   ")), UNKNOWN);
        assert_eq!(sanitize_user_agent(Some("<b></b>")), UNKNOWN);
        assert_eq!(
            sanitize_user_agent(Some("  <i>Firefox</i>/128 ")),
            "Firefox/128"
        );
        let long = "a".repeat(500);
        assert_eq!(sanitize_user_agent(Some(&long)).chars().count(), 190);
    }

    #[test]
    fn engine_defaults_time_and_bucket_from_request() {
        let engine = engine(SecurityMode::Strict);
        let request = request();

        let defaulted = engine.fingerprint(&request, &mut VisitorScope::new(), "download", None, None);
        let explicit = engine.fingerprint(
            &request,
            &mut VisitorScope::new(),
            "download",
            Some(request.now.unix_timestamp()),
            Some(60),
        );
        let non_positive =
            engine.fingerprint(&request, &mut VisitorScope::new(), "download", Some(0), Some(-5));

        assert_eq!(defaulted.digest, explicit.digest);
        assert_eq!(defaulted.digest, non_positive.digest);
        assert_eq!(defaulted.identity, "192.0.2.10");
        assert_eq!(defaulted.user_agent, "Mozilla/5.0 (X11)");
    }

    #[test]
    fn reduced_mode_fingerprints_the_token() {
        let engine = engine(SecurityMode::Reduced);
        let mut scope = VisitorScope::new();
        let print = engine.fingerprint(&request(), &mut scope, "download", Some(T), None);

        let token = scope.token().expect("token minted");
        assert_eq!(print.identity, token.value);
        assert_eq!(scope.pending_cookies().len(), 1);
    }

    #[test]
    fn stable_digest_ignores_request_time() {
        let engine = engine(SecurityMode::Strict);
        let earlier = request();
        let later = request().at(datetime!(2024-02-01 08:00:00 UTC));

        assert_eq!(
            engine.stable_digest("192.0.2.10", &earlier, "reporter"),
            engine.stable_digest("192.0.2.10", &later, "reporter")
        );
        assert_ne!(
            engine.stable_digest("192.0.2.10", &earlier, "reporter"),
            engine.stable_digest("192.0.2.11", &earlier, "reporter")
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(SaltKey::new(b""), Err(FingerprintError::EmptySecret)));
    }
}
