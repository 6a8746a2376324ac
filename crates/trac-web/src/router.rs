//! Axum router setup for the Trac server

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    ServerState,
    handlers::{dispatch_handler, health_check},
};

/// Create the axum router: the health endpoint, everything else through
/// the request dispatcher.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .fallback(dispatch_handler)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
