//! Geocode proxy server.
//!
//! Exposes the resolution pipeline over HTTP so browsers never see the
//! provider key. Shares one pipeline (and its cache) across all requests.

mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use log::info;
use state::AppState;
use std::io;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::location::ResolutionPipeline;

pub fn build_router(pipeline: ResolutionPipeline) -> Router {
    let state = Arc::new(AppState {
        pipeline: Mutex::new(pipeline),
    });

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/geocode", post(handlers::geocode))
        .route("/api/resolve", post(handlers::resolve_batch))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, pipeline: ResolutionPipeline) -> io::Result<()> {
    let app = build_router(pipeline);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("geocode proxy listening on http://{}", addr);
    axum::serve(listener, app).await
}
