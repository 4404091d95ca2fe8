//! Application services composed over the cache, identity and store layers.

pub mod error;
pub mod featured;
pub mod rate_limit;
pub mod repos;
pub mod videos;
