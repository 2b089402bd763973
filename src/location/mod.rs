//! Location resolution for festival venues.
//!
//! Turns free-text venue strings into coordinates and a country label via
//! manual overrides, a persistent cache and an external geocoding provider.

pub mod cache;
pub mod overrides;
pub mod providers;
pub mod resolver;
pub mod types;

pub use cache::{CacheStore, LocalCache, MemoryCache, RemoteCache};
pub use overrides::OverrideTable;
pub use providers::{GeocodeProvider, OpenCageProvider, ProxyProvider};
pub use resolver::{BatchResolution, BatchStats, ResolutionPipeline, RetryPolicy};
pub use types::{LookupError, ResolutionOutcome, ResolvedLocation, UnresolvedReason};
