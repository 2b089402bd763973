//! Festival feed records and the map markers built from them.

use crate::location::{ResolutionOutcome, ResolutionPipeline};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot read feed {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid feed {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One festival as delivered by the data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FestivalRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// A festival placed on the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub name: String,
    pub date: String,
    pub location: String,
    pub links: Vec<String>,
    pub lat: f64,
    pub lng: f64,
    pub country: String,
}

/// Everything the map view needs from one feed.
#[derive(Debug, Clone, Serialize)]
pub struct FestivalMap {
    pub markers: Vec<MapMarker>,
    /// Distinct marker countries, sorted, for the country filter.
    pub countries: Vec<String>,
    /// Raw locations that could not be placed.
    pub unresolved: Vec<String>,
}

/// Read a JSON array of festival records.
pub fn load(path: &Path) -> Result<Vec<FestivalRecord>, FeedError> {
    let data = fs::read_to_string(path).map_err(|source| FeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| FeedError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve every record's location and keep the ones that land on the map.
pub fn place_on_map(records: &[FestivalRecord], pipeline: &mut ResolutionPipeline) -> FestivalMap {
    let raws: Vec<&str> = records
        .iter()
        .map(|r| r.location.as_deref().unwrap_or(""))
        .collect();
    let batch = pipeline.resolve_all(&raws);

    let markers: Vec<MapMarker> = records
        .iter()
        .zip(&batch.outcomes)
        .filter_map(|(record, outcome)| match outcome {
            ResolutionOutcome::Resolved { location } => Some(MapMarker {
                name: record.name.clone(),
                date: record.date.clone(),
                location: record.location.clone().unwrap_or_default(),
                links: record.links.clone(),
                lat: location.lat,
                lng: location.lng,
                country: location.country.clone(),
            }),
            ResolutionOutcome::Unresolved { .. } => None,
        })
        .collect();

    let countries = markers
        .iter()
        .map(|m| m.country.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    FestivalMap {
        markers,
        countries,
        unresolved: batch.unresolved,
    }
}
