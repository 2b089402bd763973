//! Geocode result caches keyed by canonical query.
//!
//! Keys are case-insensitive and whitespace-collapsed. No TTL and no eviction:
//! a venue does not move, so an entry stays valid for the life of the store.
//! Writes are first-wins: once a key holds a value it is never replaced.
//!
//! Every backend absorbs its own storage failures. A failed read is a miss,
//! a failed write is logged and dropped.

use super::types::ResolvedLocation;
use crate::config::CacheConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Key→location store consulted before any provider call.
pub trait CacheStore {
    fn get(&self, query: &str) -> Option<ResolvedLocation>;
    fn put(&mut self, query: &str, location: &ResolvedLocation);
}

/// Normalized cache key: lowercase, single spaces, no surrounding whitespace.
pub fn cache_key(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the backend selected by configuration.
pub fn open(config: &CacheConfig, timeout: Duration) -> Box<dyn CacheStore + Send> {
    match config {
        CacheConfig::Local { path } => {
            let cache = match path {
                Some(p) => LocalCache::load_from(p.clone()),
                None => LocalCache::load(),
            };
            Box::new(cache)
        }
        CacheConfig::Remote { base_url } => Box::new(RemoteCache::new(base_url, timeout)),
        CacheConfig::Memory => Box::new(MemoryCache::default()),
    }
}

/// First-wins insert shared by the backends. Returns true if the map changed.
fn insert_once<V>(
    entries: &mut HashMap<String, V>,
    key: String,
    value: V,
    same: impl Fn(&V, &V) -> bool,
) -> bool {
    match entries.get(&key) {
        Some(existing) => {
            if !same(existing, &value) {
                warn!("cache: keeping existing entry for '{}', ignoring conflicting write", key);
            }
            false
        }
        None => {
            entries.insert(key, value);
            true
        }
    }
}

// ─── Local file cache ───────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct CacheEntry {
    lat: f64,
    lng: f64,
    country: String,
    /// Unix millis of the write. Decides which entry wins when two processes
    /// wrote the same key.
    #[serde(default)]
    cached_at: i64,
}

impl CacheEntry {
    fn new(loc: &ResolvedLocation) -> Self {
        Self {
            lat: loc.lat,
            lng: loc.lng,
            country: loc.country.clone(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn location(&self) -> ResolvedLocation {
        ResolvedLocation::new(self.lat, self.lng, self.country.clone())
    }

    fn same_location(&self, other: &CacheEntry) -> bool {
        self.lat == other.lat && self.lng == other.lng && self.country == other.country
    }
}

/// JSON file cache, by default at ~/.festgeo/cache.json.
pub struct LocalCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl LocalCache {
    /// Load cache from the default location (~/.festgeo/cache.json).
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load cache from a specific path.
    pub fn load_from(path: PathBuf) -> Self {
        let entries = Self::read_file(&path);
        debug!("cache: loaded {} entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".festgeo")
            .join("cache.json")
    }

    fn read_file(path: &Path) -> HashMap<String, CacheEntry> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!("cache: cannot read {}: {}", path.display(), e);
                return HashMap::new();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!("cache: ignoring corrupt cache file {}: {}", path.display(), e);
            HashMap::new()
        })
    }

    /// Fold in entries other processes wrote since load, then replace the
    /// file atomically. On a shared key the earlier write wins, the file's on
    /// a tie.
    fn persist(&mut self) -> io::Result<()> {
        for (key, theirs) in Self::read_file(&self.path) {
            match self.entries.get_mut(&key) {
                Some(ours) if theirs.cached_at <= ours.cached_at => {
                    if !ours.same_location(&theirs) {
                        debug!("cache: '{}' was written first by another process", key);
                    }
                    *ours = theirs;
                }
                Some(_) => {}
                None => {
                    self.entries.insert(key, theirs);
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(format!(".{}.tmp", std::process::id()));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for LocalCache {
    fn get(&self, query: &str) -> Option<ResolvedLocation> {
        self.entries.get(&cache_key(query)).map(CacheEntry::location)
    }

    fn put(&mut self, query: &str, location: &ResolvedLocation) {
        let entry = CacheEntry::new(location);
        if !insert_once(&mut self.entries, cache_key(query), entry, CacheEntry::same_location) {
            return;
        }
        if let Err(e) = self.persist() {
            warn!("cache: failed to write {}: {}", self.path.display(), e);
        }
    }
}

// ─── In-memory cache ────────────────────────────────────────────

/// Process-local cache with no persistence.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, ResolvedLocation>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, query: &str) -> Option<ResolvedLocation> {
        self.entries.get(&cache_key(query)).cloned()
    }

    fn put(&mut self, query: &str, location: &ResolvedLocation) {
        insert_once(&mut self.entries, cache_key(query), location.clone(), |a, b| a == b);
    }
}

// ─── Remote HTTP cache ──────────────────────────────────────────

/// Shared key-value store over HTTP.
///
/// `GET {base}/{key}` returns the stored location or 404. `PUT {base}/{key}`
/// with `If-None-Match: *` stores one, or answers 412 if the key is taken, in
/// which case the stored value is read back and kept. Writes are mirrored
/// in-process so a later read in the same process sees them even if the
/// remote write was lost.
pub struct RemoteCache {
    agent: ureq::Agent,
    base_url: String,
    mirror: HashMap<String, ResolvedLocation>,
}

impl RemoteCache {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(crate::USER_AGENT)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            mirror: HashMap::new(),
        }
    }

    fn entry_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(key))
    }
}

impl RemoteCache {
    fn fetch(&self, key: &str) -> Option<ResolvedLocation> {
        match self.agent.get(&self.entry_url(key)).call() {
            Ok(resp) => resp
                .into_json::<ResolvedLocation>()
                .map_err(|e| warn!("cache: bad remote entry for '{}': {}", key, e))
                .ok(),
            Err(ureq::Error::Status(404, _)) => None,
            Err(e) => {
                warn!("cache: remote read for '{}' failed: {}", key, e);
                None
            }
        }
    }
}

impl CacheStore for RemoteCache {
    fn get(&self, query: &str) -> Option<ResolvedLocation> {
        let key = cache_key(query);
        if let Some(loc) = self.mirror.get(&key) {
            return Some(loc.clone());
        }
        self.fetch(&key)
    }

    fn put(&mut self, query: &str, location: &ResolvedLocation) {
        let key = cache_key(query);
        if self.mirror.contains_key(&key) {
            insert_once(&mut self.mirror, key, location.clone(), |a, b| a == b);
            return;
        }

        let result = self
            .agent
            .put(&self.entry_url(&key))
            .set("If-None-Match", "*")
            .send_json(location);

        let kept = match result {
            Ok(_) => location.clone(),
            Err(ureq::Error::Status(412, _)) => match self.fetch(&key) {
                Some(existing) => {
                    if existing != *location {
                        warn!("cache: keeping existing remote entry for '{}', ignoring conflicting write", key);
                    }
                    existing
                }
                None => location.clone(),
            },
            Err(e) => {
                warn!("cache: remote write for '{}' failed: {}", key, e);
                location.clone()
            }
        };
        self.mirror.insert(key, kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn test_cache() -> (LocalCache, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        (LocalCache::load_from(path), dir)
    }

    fn lloret() -> ResolvedLocation {
        ResolvedLocation::new(41.6998, 2.8456, "Spain")
    }

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(cache_key("  Lloret   de Mar "), "lloret de mar");
        assert_eq!(cache_key("LLORET DE MAR"), cache_key("lloret de mar"));
    }

    #[test]
    fn test_cache_put_get_exact() {
        let (mut cache, _dir) = test_cache();
        let loc = ResolvedLocation::new(41.699812345678, -2.845600000001, "Spain");
        cache.put("Lloret de Mar", &loc);

        assert_eq!(cache.get("Lloret de Mar"), Some(loc));
    }

    #[test]
    fn test_cache_case_insensitive() {
        let (mut cache, _dir) = test_cache();
        cache.put("Lloret de Mar", &lloret());

        assert!(cache.get("LLORET DE MAR").is_some());
        assert!(cache.get("lloret  de mar").is_some());
    }

    #[test]
    fn test_cache_miss() {
        let (cache, _dir) = test_cache();
        assert!(cache.get("nonexistent").is_none());
    }

    #[test]
    fn test_first_write_wins() {
        let (mut cache, _dir) = test_cache();
        cache.put("Lloret de Mar", &lloret());
        cache.put("lloret de mar", &ResolvedLocation::new(0.0, 0.0, "Other"));

        assert_eq!(cache.get("Lloret de Mar"), Some(lloret()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        {
            let mut cache = LocalCache::load_from(path.clone());
            cache.put("Kraków, Poland", &ResolvedLocation::new(50.0647, 19.945, "Poland"));
        }

        let reopened = LocalCache::load_from(path);
        let loc = reopened.get("kraków, poland").unwrap();
        assert_eq!(loc.country, "Poland");
        assert_relative_eq!(loc.lat, 50.0647);
        assert_relative_eq!(loc.lng, 19.945);
    }

    #[test]
    fn test_corrupt_file_is_empty_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{ not json").unwrap();

        let mut cache = LocalCache::load_from(path.clone());
        assert!(cache.is_empty());

        // Still usable, and the next write replaces the bad file.
        cache.put("Lloret de Mar", &lloret());
        let reopened = LocalCache::load_from(path);
        let loc = reopened.get("Lloret de Mar").unwrap();
        assert_relative_eq!(loc.lat, 41.6998);
        assert_eq!(loc.country, "Spain");
    }

    #[test]
    fn test_entry_without_optional_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let json = r#"{
            "lloret de mar": { "lat": 41.6998, "lng": 2.8456, "country": "Spain" }
        }"#;
        fs::write(&path, json).unwrap();

        let cache = LocalCache::load_from(path);
        let loc = cache.get("Lloret de Mar").unwrap();
        assert_relative_eq!(loc.lng, 2.8456);
        assert_eq!(loc.country, "Spain");
    }

    #[test]
    fn test_unwritable_path_still_reads_back() {
        let dir = TempDir::new().unwrap();
        // Parent is a file, so create_dir_all fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let mut cache = LocalCache::load_from(blocker.join("cache.json"));

        cache.put("Lloret de Mar", &lloret());
        assert_eq!(cache.get("Lloret de Mar"), Some(lloret()));
    }

    #[test]
    fn test_two_processes_share_one_file() {
        let (mut first, dir) = test_cache();
        let mut second = LocalCache::load_from(dir.path().join("cache.json"));

        first.put("Lloret de Mar", &lloret());
        second.put("lloret de mar", &ResolvedLocation::new(0.0, 0.0, "Other"));
        second.put("Kraków, Poland", &ResolvedLocation::new(50.0647, 19.945, "Poland"));

        let reopened = LocalCache::load_from(dir.path().join("cache.json"));
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("Lloret de Mar"), Some(lloret()));
        assert_eq!(second.get("Lloret de Mar"), Some(lloret()));

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "temp file left behind");
    }

    #[test]
    fn test_memory_cache() {
        let mut cache = MemoryCache::default();
        assert!(cache.get("Lloret de Mar").is_none());
        cache.put("Lloret de Mar", &lloret());
        cache.put("Lloret de Mar", &lloret());
        assert_eq!(cache.get("lloret de mar"), Some(lloret()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remote_cache_unreachable() {
        // Nothing listens on the discard port; reads miss, writes are mirrored.
        let mut cache = RemoteCache::new("http://127.0.0.1:9/cache/", Duration::from_secs(1));
        assert!(cache.get("Lloret de Mar").is_none());

        cache.put("Lloret de Mar", &lloret());
        assert_eq!(cache.get("LLORET DE MAR"), Some(lloret()));
    }

    /// In-process KV store honoring `If-None-Match: *`. Returns its base URL;
    /// keep the runtime alive for as long as the store is needed.
    fn kv_store() -> (tokio::runtime::Runtime, String) {
        use axum::extract::{Path as UrlPath, State};
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::get;
        use std::sync::{Arc, Mutex};

        type Store = Arc<Mutex<HashMap<String, String>>>;

        async fn read(State(store): State<Store>, UrlPath(key): UrlPath<String>) -> Result<String, StatusCode> {
            store.lock().unwrap().get(&key).cloned().ok_or(StatusCode::NOT_FOUND)
        }

        async fn write(
            State(store): State<Store>,
            UrlPath(key): UrlPath<String>,
            headers: HeaderMap,
            body: String,
        ) -> StatusCode {
            let mut store = store.lock().unwrap();
            if headers.get("if-none-match").is_some_and(|v| v == "*") && store.contains_key(&key) {
                return StatusCode::PRECONDITION_FAILED;
            }
            store.insert(key, body);
            StatusCode::NO_CONTENT
        }

        let app = axum::Router::new()
            .route("/kv/{key}", get(read).put(write))
            .with_state(Store::default());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let base = format!("http://{}/kv", listener.local_addr().unwrap());
        rt.spawn(async move { axum::serve(listener, app).await });
        (rt, base)
    }

    #[test]
    fn test_remote_cache_round_trip() {
        let (_rt, base) = kv_store();
        let mut writer = RemoteCache::new(&base, Duration::from_secs(5));
        writer.put("Lloret de Mar, Spain", &lloret());

        let reader = RemoteCache::new(&base, Duration::from_secs(5));
        assert_eq!(reader.get("LLORET DE MAR,  spain"), Some(lloret()));
        assert!(reader.get("Atlantis").is_none());
    }

    #[test]
    fn test_remote_first_write_wins_across_clients() {
        let (_rt, base) = kv_store();
        let mut a = RemoteCache::new(&base, Duration::from_secs(5));
        let mut b = RemoteCache::new(&base, Duration::from_secs(5));
        assert!(a.get("Lloret de Mar").is_none());
        assert!(b.get("Lloret de Mar").is_none());

        a.put("Lloret de Mar", &lloret());
        b.put("Lloret de Mar", &ResolvedLocation::new(2.0, 2.0, "Other"));

        let fresh = RemoteCache::new(&base, Duration::from_secs(5));
        assert_eq!(fresh.get("Lloret de Mar"), Some(lloret()));
        assert_eq!(a.get("Lloret de Mar"), Some(lloret()));
        assert_eq!(b.get("Lloret de Mar"), Some(lloret()));
    }

    #[test]
    fn test_remote_entry_url_encodes_key() {
        let cache = RemoteCache::new("http://cache.local/kv/", Duration::from_secs(1));
        assert_eq!(
            cache.entry_url("lloret de mar, spain"),
            "http://cache.local/kv/lloret%20de%20mar%2C%20spain"
        );
    }
}
