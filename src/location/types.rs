//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Country label used when the provider returns no country component.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Coordinates and country label for one canonical query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub lat: f64,
    pub lng: f64,
    pub country: String,
}

impl ResolvedLocation {
    pub fn new(lat: f64, lng: f64, country: impl Into<String>) -> Self {
        Self {
            lat,
            lng,
            country: country.into(),
        }
    }
}

/// Why an input item could not be placed on the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum UnresolvedReason {
    MissingLocation,
    NoResults,
    LookupFailed(String),
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocation => write!(f, "missing location"),
            Self::NoResults => write!(f, "no results"),
            Self::LookupFailed(cause) => write!(f, "lookup failed: {}", cause),
        }
    }
}

/// Terminal per-item result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved {
        #[serde(flatten)]
        location: ResolvedLocation,
    },
    Unresolved {
        reason: UnresolvedReason,
    },
}

impl ResolutionOutcome {
    pub fn resolved(location: ResolvedLocation) -> Self {
        Self::Resolved { location }
    }

    pub fn unresolved(reason: UnresolvedReason) -> Self {
        Self::Unresolved { reason }
    }

    pub fn location(&self) -> Option<&ResolvedLocation> {
        match self {
            Self::Resolved { location } => Some(location),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl From<LookupError> for UnresolvedReason {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(_) => Self::NoResults,
            other => Self::LookupFailed(other.to_string()),
        }
    }
}

/// Failure of a single provider lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no results for '{0}'")]
    NotFound(String),
    #[error("invalid query")]
    InvalidQuery,
    #[error("network error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("invalid provider response: {0}")]
    Malformed(String),
}

impl LookupError {
    /// Errors worth another attempt: the request may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    pub(crate) fn from_ureq(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::Status(code),
            ureq::Error::Transport(t) => Self::Transport(t.to_string()),
        }
    }
}
