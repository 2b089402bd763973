//! Geocoding providers: OpenCage directly, or through a geocode proxy.
//!
//! A provider answers one canonical query with one request. It never retries
//! and never consults the cache; both are the pipeline's job.

use super::types::{LookupError, ResolvedLocation};
use crate::config::{GeocodeConfig, ProviderConfig};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;

/// Single-request geocoding client.
pub trait GeocodeProvider {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Resolve `query` to the provider's best match.
    fn lookup(&self, query: &str) -> Result<ResolvedLocation, LookupError>;
}

/// Build the provider selected by configuration.
pub fn build(config: &GeocodeConfig) -> Box<dyn GeocodeProvider + Send> {
    let timeout = config.timeout();
    match &config.provider {
        ProviderConfig::Opencage { endpoint, api_key } => {
            if api_key.is_none() {
                warn!("geocode: no OpenCage API key configured (set {})", crate::config::API_KEY_ENV);
            }
            Box::new(OpenCageProvider::new(
                endpoint,
                api_key.clone(),
                &config.missing_country,
                timeout,
            ))
        }
        ProviderConfig::Proxy { url } => {
            Box::new(ProxyProvider::new(url, &config.missing_country, timeout))
        }
    }
}

fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(crate::USER_AGENT)
        .build()
}

fn check_query(query: &str) -> Result<(), LookupError> {
    if query.trim().is_empty() {
        return Err(LookupError::InvalidQuery);
    }
    Ok(())
}

fn country_or(country: Option<String>, sentinel: &str) -> String {
    country
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| sentinel.to_string())
}

// ─── OpenCage ───────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct OpenCageResponse {
    results: Vec<OpenCageResult>,
}

#[derive(Deserialize, Debug)]
struct OpenCageResult {
    geometry: Geometry,
    #[serde(default)]
    components: Components,
}

#[derive(Deserialize, Debug, Clone, Copy)]
struct Geometry {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize, Debug, Default)]
struct Components {
    #[serde(default)]
    country: Option<String>,
}

/// OpenCage forward geocoding.
pub struct OpenCageProvider {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
    missing_country: String,
}

impl OpenCageProvider {
    pub fn new(endpoint: &str, api_key: Option<String>, missing_country: &str, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            endpoint: endpoint.to_string(),
            api_key,
            missing_country: missing_country.to_string(),
        }
    }
}

impl GeocodeProvider for OpenCageProvider {
    fn name(&self) -> &'static str {
        "OpenCage"
    }

    fn lookup(&self, query: &str) -> Result<ResolvedLocation, LookupError> {
        check_query(query)?;
        info!("geocode: OpenCage lookup for '{}'", query);

        let mut request = self.agent.get(&self.endpoint).query("q", query);
        if let Some(key) = &self.api_key {
            request = request.query("key", key);
        }
        let response = request.call().map_err(LookupError::from_ureq)?;
        let body = response
            .into_string()
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        parse_opencage(query, &body, &self.missing_country)
    }
}

/// First result of an OpenCage response body.
fn parse_opencage(query: &str, body: &str, missing_country: &str) -> Result<ResolvedLocation, LookupError> {
    let parsed: OpenCageResponse =
        serde_json::from_str(body).map_err(|e| LookupError::Malformed(e.to_string()))?;

    let first = parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| LookupError::NotFound(query.to_string()))?;

    debug!("geocode: '{}' -> {}, {}", query, first.geometry.lat, first.geometry.lng);
    Ok(ResolvedLocation::new(
        first.geometry.lat,
        first.geometry.lng,
        country_or(first.components.country, missing_country),
    ))
}

// ─── Geocode proxy ──────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct ProxyResponse {
    coordinates: Geometry,
    #[serde(default)]
    country: Option<String>,
}

/// Client for a geocode proxy: `POST {url}` with `{"location": query}`.
///
/// The proxy signals "no match" with 404 and a bad request with 400; any
/// other non-2xx status is a provider failure.
pub struct ProxyProvider {
    agent: ureq::Agent,
    url: String,
    missing_country: String,
}

impl ProxyProvider {
    pub fn new(url: &str, missing_country: &str, timeout: Duration) -> Self {
        Self {
            agent: agent(timeout),
            url: url.to_string(),
            missing_country: missing_country.to_string(),
        }
    }
}

impl GeocodeProvider for ProxyProvider {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn lookup(&self, query: &str) -> Result<ResolvedLocation, LookupError> {
        check_query(query)?;
        info!("geocode: proxy lookup for '{}'", query);

        let result = self
            .agent
            .post(&self.url)
            .send_json(serde_json::json!({ "location": query }));

        match result {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|e| LookupError::Transport(e.to_string()))?;
                parse_proxy(&body, &self.missing_country)
            }
            Err(ureq::Error::Status(code, _)) => Err(proxy_status_error(query, code)),
            Err(e) => Err(LookupError::from_ureq(e)),
        }
    }
}

fn proxy_status_error(query: &str, code: u16) -> LookupError {
    match code {
        404 => LookupError::NotFound(query.to_string()),
        400 => LookupError::InvalidQuery,
        other => LookupError::Status(other),
    }
}

fn parse_proxy(body: &str, missing_country: &str) -> Result<ResolvedLocation, LookupError> {
    let parsed: ProxyResponse =
        serde_json::from_str(body).map_err(|e| LookupError::Malformed(e.to_string()))?;
    Ok(ResolvedLocation::new(
        parsed.coordinates.lat,
        parsed.coordinates.lng,
        country_or(parsed.country, missing_country),
    ))
}
