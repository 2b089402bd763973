//! Festival venue geocoding: overrides, a persistent cache and batch resolution
//! of free-text locations into map coordinates.

pub mod config;
pub mod feed;
pub mod location;
pub mod server;

/// User-Agent for every outbound request.
pub const USER_AGENT: &str = concat!("festival-geo/", env!("CARGO_PKG_VERSION"));
