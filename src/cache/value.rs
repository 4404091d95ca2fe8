//! Values stored in the tiered cache.

use bytes::Bytes;

/// A cached value: either a counter or an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Number(i64),
    Text(String),
    Bytes(Bytes),
}

impl CacheValue {
    /// Interpret the value as a counter.
    ///
    /// Numeric strings parse; anything else counts as zero so a type mismatch
    /// never aborts a read-modify-write.
    pub fn as_counter(&self) -> i64 {
        match self {
            CacheValue::Number(n) => *n,
            CacheValue::Text(text) => parse_leading_int(text),
            CacheValue::Bytes(bytes) => std::str::from_utf8(bytes)
                .map(parse_leading_int)
                .unwrap_or(0),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            CacheValue::Text(text) => Some(text.as_bytes()),
            CacheValue::Number(_) => None,
        }
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Number(value)
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Text(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_string())
    }
}

impl From<Bytes> for CacheValue {
    fn from(value: Bytes) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(Bytes::from(value))
    }
}

fn parse_leading_int(text: &str) -> i64 {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .take_while(|(idx, ch)| ch.is_ascii_digit() || (*idx == 0 && (*ch == '-' || *ch == '+')))
        .map(|(idx, ch)| idx + ch.len_utf8())
        .last()
        .unwrap_or(0);
    trimmed[..end].parse().unwrap_or(0)
}
