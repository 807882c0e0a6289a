// src/proxy/routes.rs
//! Axum router for the index proxy
//!
//! pip requests listing and file URLs both with and without a trailing
//! slash, so each route is registered twice.

use super::ProxyState;
use super::handlers::{distribution_file, distribution_page};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/:dist", get(distribution_page))
        .route("/:dist/", get(distribution_page))
        .route("/:dist/:file", get(distribution_file))
        .route("/:dist/:file/", get(distribution_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
