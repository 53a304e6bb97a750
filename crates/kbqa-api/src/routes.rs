//! API route definitions

use crate::handlers::{index, query};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Query endpoints
        .route("/query", post(query::query_handler))
        .route("/search", post(query::search_handler))
        // Index endpoints
        .route("/index/stats", get(index::stats_handler))
        .route("/index/reindex", post(index::reindex_handler))
}
