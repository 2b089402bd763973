//! Runtime configuration, loaded from ~/.festgeo/config.json.
//!
//! Every field has a default, so a missing file or a partial one is valid.
//! The OpenCage key may also come from `OPENCAGE_API_KEY`.

use crate::location::overrides::default_overrides;
use crate::location::types::UNKNOWN_COUNTRY;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_ENV: &str = "OPENCAGE_API_KEY";
pub const OPENCAGE_ENDPOINT: &str = "https://api.opencagedata.com/geocode/v1/json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which geocoding service answers cache misses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Call OpenCage directly with an API key.
    Opencage {
        #[serde(default = "default_endpoint")]
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
    },
    /// Go through a geocode proxy that holds the key.
    Proxy { url: String },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Opencage {
            endpoint: default_endpoint(),
            api_key: None,
        }
    }
}

fn default_endpoint() -> String {
    OPENCAGE_ENDPOINT.to_string()
}

/// Where resolved locations are kept between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheConfig {
    Local {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Remote {
        base_url: String,
    },
    Memory,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Local { path: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    /// Raw venue string → query actually sent to the provider.
    pub overrides: BTreeMap<String, String>,
    pub provider: ProviderConfig,
    pub cache: CacheConfig,
    /// Per-request timeout for provider and remote cache calls.
    pub timeout_secs: u64,
    /// Extra attempts after a transient lookup failure. 0 disables retries.
    pub retry_attempts: u32,
    /// Backoff unit; attempt n waits n times this.
    pub retry_backoff_ms: u64,
    /// Country label when the provider gives none.
    pub missing_country: String,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            overrides: default_overrides(),
            provider: ProviderConfig::default(),
            cache: CacheConfig::default(),
            timeout_secs: 10,
            retry_attempts: 0,
            retry_backoff_ms: 500,
            missing_country: UNKNOWN_COUNTRY.to_string(),
        }
    }
}

impl GeocodeConfig {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        let mut config = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        config.apply_env(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".festgeo")
            .join("config.json")
    }

    /// Fill the OpenCage key from the environment when the file has none.
    pub fn apply_env(&mut self, env_key: Option<String>) {
        if let ProviderConfig::Opencage { api_key, .. } = &mut self.provider {
            if api_key.is_none() {
                *api_key = env_key.filter(|k| !k.trim().is_empty());
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = GeocodeConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.missing_country, "Unknown");
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.retry_attempts, 0);
        assert_eq!(config.cache, CacheConfig::Local { path: None });
        assert!(config.overrides.contains_key("Long Beach, Kryemedhenj, golem"));
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "provider": { "kind": "proxy", "url": "http://localhost:5000/api/geocode" },
                "cache": { "kind": "remote", "base_url": "http://kv.local/geo" },
                "missing_country": "Other"
            }"#,
        )
        .unwrap();

        let config = GeocodeConfig::load(Some(&path)).unwrap();
        assert_eq!(
            config.provider,
            ProviderConfig::Proxy {
                url: "http://localhost:5000/api/geocode".into()
            }
        );
        assert_eq!(
            config.cache,
            CacheConfig::Remote {
                base_url: "http://kv.local/geo".into()
            }
        );
        assert_eq!(config.missing_country, "Other");
        assert_eq!(config.retry_backoff_ms, 500);
    }

    #[test]
    fn test_opencage_endpoint_defaults() {
        let config: GeocodeConfig =
            serde_json::from_str(r#"{ "provider": { "kind": "opencage", "api_key": "abc" } }"#).unwrap();
        assert_eq!(
            config.provider,
            ProviderConfig::Opencage {
                endpoint: OPENCAGE_ENDPOINT.into(),
                api_key: Some("abc".into())
            }
        );
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"timeout_secs\": \"soon\" }").unwrap();
        assert!(matches!(
            GeocodeConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_key_only_fills_gap() {
        let mut config = GeocodeConfig::default();
        config.apply_env(Some("from-env".into()));
        assert!(matches!(
            &config.provider,
            ProviderConfig::Opencage { api_key: Some(k), .. } if k == "from-env"
        ));

        let mut config = GeocodeConfig {
            provider: ProviderConfig::Opencage {
                endpoint: OPENCAGE_ENDPOINT.into(),
                api_key: Some("from-file".into()),
            },
            ..GeocodeConfig::default()
        };
        config.apply_env(Some("from-env".into()));
        assert!(matches!(
            &config.provider,
            ProviderConfig::Opencage { api_key: Some(k), .. } if k == "from-file"
        ));
    }

    #[test]
    fn test_blank_env_key_ignored() {
        let mut config = GeocodeConfig::default();
        config.apply_env(Some("  ".into()));
        assert!(matches!(
            &config.provider,
            ProviderConfig::Opencage { api_key: None, .. }
        ));
    }
}
