//! Batch resolution pipeline.
//!
//! Per item:  trim → override → batch memo → cache → provider (→ cache write)
//!
//! Items are processed in input order, one at a time, so a cache write for one
//! item is visible to every later item. The batch memo additionally guarantees
//! one provider call per distinct query per batch even when the cache drops
//! writes. No item's failure stops the batch.

use super::cache::{self, cache_key, CacheStore};
use super::overrides::OverrideTable;
use super::providers::{self, GeocodeProvider};
use super::types::{LookupError, ResolutionOutcome, ResolvedLocation, UnresolvedReason};
use crate::config::GeocodeConfig;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// How often a transient provider failure is retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first. 0 means a single attempt.
    pub attempts: u32,
    /// Attempt n sleeps n × backoff first.
    pub backoff: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub cache_hits: usize,
    pub provider_calls: usize,
}

/// Result of one `resolve_all` call.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResolution {
    /// One outcome per input, same order.
    pub outcomes: Vec<ResolutionOutcome>,
    /// Raw inputs whose outcome was unresolved, in input order.
    pub unresolved: Vec<String>,
    pub stats: BatchStats,
}

/// Override table, cache and provider wired together.
pub struct ResolutionPipeline {
    overrides: OverrideTable,
    cache: Box<dyn CacheStore + Send>,
    provider: Box<dyn GeocodeProvider + Send>,
    retry: RetryPolicy,
    offline: bool,
}

impl ResolutionPipeline {
    pub fn new(
        overrides: OverrideTable,
        cache: Box<dyn CacheStore + Send>,
        provider: Box<dyn GeocodeProvider + Send>,
    ) -> Self {
        Self {
            overrides,
            cache,
            provider,
            retry: RetryPolicy::default(),
            offline: false,
        }
    }

    /// Build every component from configuration.
    pub fn from_config(config: &GeocodeConfig) -> Self {
        Self::new(
            OverrideTable::new(config.overrides.clone()),
            cache::open(&config.cache, config.timeout()),
            providers::build(config),
        )
        .with_retry(RetryPolicy {
            attempts: config.retry_attempts,
            backoff: config.retry_backoff(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Offline mode: answer from the cache only, never call the provider.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Resolve a batch. The result is always complete and index-aligned.
    pub fn resolve_all<S: AsRef<str>>(&mut self, raws: &[S]) -> BatchResolution {
        let mut memo = HashMap::new();
        let mut stats = BatchStats::default();
        let mut outcomes = Vec::with_capacity(raws.len());
        let mut unresolved = Vec::new();

        for raw in raws {
            let raw = raw.as_ref();
            let outcome = self.resolve_item(raw, &mut memo, &mut stats);
            if let ResolutionOutcome::Unresolved { reason } = &outcome {
                warn!("unresolved location '{}': {}", raw, reason);
                unresolved.push(raw.to_string());
            }
            outcomes.push(outcome);
        }

        info!(
            "resolved {}/{} locations ({} cache hits, {} provider calls)",
            raws.len() - unresolved.len(),
            raws.len(),
            stats.cache_hits,
            stats.provider_calls,
        );

        BatchResolution {
            outcomes,
            unresolved,
            stats,
        }
    }

    /// Resolve a single location string.
    pub fn resolve_one(&mut self, raw: &str) -> ResolutionOutcome {
        self.resolve_item(raw, &mut HashMap::new(), &mut BatchStats::default())
    }

    fn resolve_item(
        &mut self,
        raw: &str,
        memo: &mut HashMap<String, ResolutionOutcome>,
        stats: &mut BatchStats,
    ) -> ResolutionOutcome {
        let raw = raw.trim();
        if raw.is_empty() {
            return ResolutionOutcome::unresolved(UnresolvedReason::MissingLocation);
        }

        let query = self.overrides.resolve(raw).to_string();
        if query != raw {
            debug!("override: '{}' -> '{}'", raw, query);
        }

        let key = cache_key(&query);
        if let Some(seen) = memo.get(&key) {
            return seen.clone();
        }

        let outcome = self.resolve_query(&query, stats);
        memo.insert(key, outcome.clone());
        outcome
    }

    fn resolve_query(&mut self, query: &str, stats: &mut BatchStats) -> ResolutionOutcome {
        if let Some(loc) = self.cache.get(query) {
            debug!("cache hit: '{}'", query);
            stats.cache_hits += 1;
            return ResolutionOutcome::resolved(loc);
        }
        debug!("cache miss: '{}'", query);

        if self.offline {
            return ResolutionOutcome::unresolved(UnresolvedReason::LookupFailed("offline mode".into()));
        }

        match self.lookup_with_retry(query, stats) {
            Ok(loc) => {
                self.cache.put(query, &loc);
                ResolutionOutcome::resolved(loc)
            }
            Err(e) => ResolutionOutcome::unresolved(e.into()),
        }
    }

    fn lookup_with_retry(&self, query: &str, stats: &mut BatchStats) -> Result<ResolvedLocation, LookupError> {
        let mut attempt = 0;
        loop {
            stats.provider_calls += 1;
            match self.provider.lookup(query) {
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    attempt += 1;
                    let wait = self.retry.backoff * attempt;
                    warn!(
                        "{} lookup for '{}' failed ({}), retry {}/{} in {:?}",
                        self.provider.name(),
                        query,
                        e,
                        attempt,
                        self.retry.attempts,
                        wait,
                    );
                    std::thread::sleep(wait);
                }
                other => return other,
            }
        }
    }
}
