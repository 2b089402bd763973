use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use crate::location::{BatchResolution, ResolutionOutcome, ResolutionPipeline, UnresolvedReason};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

#[derive(Debug)]
pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

/// Status and message for a location the pipeline could not resolve.
fn unresolved_error(reason: &UnresolvedReason) -> ApiError {
    match reason {
        UnresolvedReason::MissingLocation => api_error(StatusCode::BAD_REQUEST, "Location is required"),
        UnresolvedReason::NoResults => api_error(StatusCode::NOT_FOUND, "Location not found"),
        UnresolvedReason::LookupFailed(_) => {
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Run `f` against the shared pipeline on the blocking pool.
async fn with_pipeline<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut ResolutionPipeline) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut pipeline = state.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *pipeline)
    })
    .await
    .map_err(|e| {
        error!("resolution task failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}

// ─── GET / ───────────────────────────────────────────────────────

pub async fn index() -> &'static str {
    "Server is running!"
}

// ─── POST /api/geocode ───────────────────────────────────────────

#[derive(Serialize, Debug, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct GeocodeResponse {
    pub location: String,
    pub coordinates: Coordinates,
    pub country: String,
}

/// Trimmed `location` string from a request body, if there is a usable one.
///
/// The body is parsed whatever its Content-Type. An absent or non-JSON body
/// and a non-string `location` all count as a missing location.
fn requested_location(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let location = value.get("location")?.as_str()?.trim();
    (!location.is_empty()).then(|| location.to_string())
}

pub(super) async fn geocode(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GeocodeResponse>, ApiError> {
    let start = Instant::now();

    let location =
        requested_location(&body).ok_or_else(|| unresolved_error(&UnresolvedReason::MissingLocation))?;

    let query = location.clone();
    let outcome = with_pipeline(state, move |p| p.resolve_one(&query)).await?;

    info!(
        "POST /api/geocode location='{}' -> {} ({:.1}ms)",
        location,
        if outcome.is_resolved() { "resolved" } else { "unresolved" },
        start.elapsed().as_secs_f64() * 1000.0,
    );

    match outcome {
        ResolutionOutcome::Resolved { location: loc } => Ok(Json(GeocodeResponse {
            location,
            coordinates: Coordinates {
                lat: loc.lat,
                lng: loc.lng,
            },
            country: loc.country,
        })),
        ResolutionOutcome::Unresolved { reason } => Err(unresolved_error(&reason)),
    }
}

// ─── POST /api/resolve ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub locations: Vec<String>,
}

pub(super) async fn resolve_batch(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BatchResolution>, ApiError> {
    let start = Instant::now();
    let req: ResolveRequest = serde_json::from_slice(&body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Expected {{\"locations\": [..]}} body: {}", e),
        )
    })?;
    let count = req.locations.len();

    let batch = with_pipeline(state, move |p| p.resolve_all(&req.locations)).await?;

    info!(
        "POST /api/resolve {} locations -> {} unresolved ({:.1}ms)",
        count,
        batch.unresolved.len(),
        start.elapsed().as_secs_f64() * 1000.0,
    );

    Ok(Json(batch))
}
