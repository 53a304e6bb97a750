//! kbqa API - HTTP server for the knowledge base
//!
//! Exposes question answering, similarity search and index management over
//! REST, plus health checks, Prometheus metrics and the OpenAPI document.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{http::HeaderValue, middleware::from_fn_with_state, routing::get, Json, Router};
use handlers::{health, index, query};
use kbqa_core::config::ServerConfig;
use kbqa_rag::ComposerConfig;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;

/// OpenAPI document for the server
#[derive(OpenApi)]
#[openapi(
    info(title = "kbqa API", description = "Knowledge base question answering"),
    paths(
        health::health_check,
        health::readiness_check,
        query::query_handler,
        query::search_handler,
        index::stats_handler,
        index::reindex_handler,
    ),
    components(schemas(
        error::ApiError,
        health::HealthResponse,
        health::ReadinessResponse,
        health::ReadinessChecks,
        query::QueryRequest,
        query::QueryResponse,
        query::Passage,
        query::SearchRequest,
        query::SearchResponse,
        index::IndexStatsResponse,
        index::ReindexResponse,
        index::FailureEntry,
    )),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "query", description = "Question answering and search"),
        (name = "index", description = "Index management")
    )
)]
pub struct ApiDoc;

/// Allowance for retrieval and response encoding on top of generation
const REQUEST_MARGIN: Duration = Duration::from_secs(10);

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = &state.config().server;
    let cors = build_cors_layer(server);
    let timeout = TimeoutLayer::new(request_timeout(
        Duration::from_secs(server.request_timeout_secs),
        state.composer().config(),
    ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", routes::api_routes())
        .layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::metrics_middleware,
        ))
        .layer(timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The configured request timeout, raised when needed so a slow LLM surfaces
/// as the composer's generation error rather than a bare 408
fn request_timeout(configured: Duration, composer: &ComposerConfig) -> Duration {
    configured.max(composer.worst_case_generation() + REQUEST_MARGIN)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn build_cors_layer(server: &ServerConfig) -> CorsLayer {
    if !server.cors_enabled {
        return CorsLayer::new();
    }

    if server.cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins = server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeout_outlasts_generation_retries() {
        let composer = ComposerConfig::default();
        let timeout = request_timeout(Duration::from_secs(120), &composer);
        assert!(timeout > composer.worst_case_generation());
        assert_eq!(timeout, Duration::from_millis(191_500));
    }

    #[test]
    fn test_longer_configured_timeout_is_kept() {
        let composer = ComposerConfig {
            max_retries: 0,
            generation_timeout: Duration::from_secs(5),
            ..ComposerConfig::default()
        };
        let timeout = request_timeout(Duration::from_secs(120), &composer);
        assert_eq!(timeout, Duration::from_secs(120));
    }
}
