//! Cache key definitions.
//!
//! Keys are `(key, group)` pairs. The fallback store has no notion of groups
//! and sees the flattened form produced by [`flatten_key`].

use uuid::Uuid;

pub const GROUP_VIDEOS: &str = "videos";
pub const GROUP_MODS: &str = "mods";
pub const GROUP_RATE_LIMIT: &str = "ratelimit";

/// A key inside a cache group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub key: String,
    pub group: &'static str,
}

impl GroupKey {
    pub fn new(key: impl Into<String>, group: &'static str) -> Self {
        Self {
            key: key.into(),
            group,
        }
    }

    pub fn flattened(&self) -> String {
        flatten_key(&self.key, self.group)
    }
}

/// Flatten `(key, group)` for stores without groups: `group_key`, or the bare
/// key when the group is empty.
pub fn flatten_key(key: &str, group: &str) -> String {
    if group.is_empty() {
        key.to_string()
    } else {
        format!("{group}_{key}")
    }
}

/// Single video payload.
pub fn video_key(id: Uuid) -> GroupKey {
    GroupKey::new(format!("video_{id}"), GROUP_VIDEOS)
}

/// The featured video of a mod.
pub fn mod_featured_key(mod_id: Uuid) -> GroupKey {
    GroupKey::new(format!("mod_featured_{mod_id}"), GROUP_MODS)
}

/// Aggregate listing of a mod's videos.
pub fn mod_videos_key(mod_id: Uuid) -> GroupKey {
    GroupKey::new(format!("mod_videos_{mod_id}"), GROUP_MODS)
}

/// Group-level keys touched by any featured-state change in a mod.
pub fn mod_aggregate_keys(mod_id: Uuid) -> [GroupKey; 2] {
    [mod_featured_key(mod_id), mod_videos_key(mod_id)]
}

/// Hit counter for a rate-limit fingerprint digest.
pub fn rate_limit_key(digest: &str) -> GroupKey {
    GroupKey::new(format!("rl_{digest}"), GROUP_RATE_LIMIT)
}
