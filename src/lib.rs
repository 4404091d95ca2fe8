//! Caching, visitor identity and featured-state core for a mod video showcase.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod identity;
pub mod infra;
