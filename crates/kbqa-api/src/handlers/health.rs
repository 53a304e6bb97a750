//! Health, readiness and metrics handlers

use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness response
#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: ReadinessChecks,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessChecks {
    /// Chunks currently searchable
    pub index_chunks: usize,
    pub embedding_model: String,
    pub llm_provider: String,
    pub llm_model: String,
}

/// Readiness check
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 503, description = "Service not ready", body = ReadinessResponse)
    )
)]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let collection = state.retrieval().collection().await;
    let llm = &state.config().llm;

    let response = ReadinessResponse {
        ready: is_ready,
        checks: ReadinessChecks {
            index_chunks: state.retrieval().size().await,
            embedding_model: collection.embedding_model,
            llm_provider: format!("{:?}", llm.provider).to_lowercase(),
            llm_model: llm.model.clone(),
        },
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.uptime_secs();
    let total_requests = state.get_request_count();
    let stats = state.retrieval().stats().await;
    let (cache_hits, cache_misses) = stats
        .cache
        .as_ref()
        .map(|c| (c.hits, c.misses))
        .unwrap_or((0, 0));

    let mut output = String::new();

    output.push_str("# HELP kbqa_uptime_seconds Time since server start\n");
    output.push_str("# TYPE kbqa_uptime_seconds gauge\n");
    output.push_str(&format!("kbqa_uptime_seconds {uptime}\n\n"));

    output.push_str("# HELP kbqa_requests_total Total number of HTTP requests\n");
    output.push_str("# TYPE kbqa_requests_total counter\n");
    output.push_str(&format!("kbqa_requests_total {total_requests}\n\n"));

    output.push_str("# HELP kbqa_build_info Build information\n");
    output.push_str("# TYPE kbqa_build_info gauge\n");
    output.push_str(&format!(
        "kbqa_build_info{{version=\"{}\"}} 1\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    // Index
    output.push_str("# HELP kbqa_index_chunks Chunks in the index\n");
    output.push_str("# TYPE kbqa_index_chunks gauge\n");
    output.push_str(&format!(
        "kbqa_index_chunks{{collection=\"{}\"}} {}\n\n",
        stats.collection.name, stats.chunk_count
    ));

    output.push_str("# HELP kbqa_index_documents Documents in the index\n");
    output.push_str("# TYPE kbqa_index_documents gauge\n");
    output.push_str(&format!(
        "kbqa_index_documents{{collection=\"{}\"}} {}\n\n",
        stats.collection.name, stats.document_count
    ));

    // Embedding cache
    output.push_str("# HELP kbqa_cache_hits_total Total number of embedding cache hits\n");
    output.push_str("# TYPE kbqa_cache_hits_total counter\n");
    output.push_str(&format!("kbqa_cache_hits_total {cache_hits}\n\n"));

    output.push_str("# HELP kbqa_cache_misses_total Total number of embedding cache misses\n");
    output.push_str("# TYPE kbqa_cache_misses_total counter\n");
    output.push_str(&format!("kbqa_cache_misses_total {cache_misses}\n\n"));

    let total_cache = cache_hits + cache_misses;
    if total_cache > 0 {
        let hit_rate = cache_hits as f64 / total_cache as f64;
        output.push_str("# HELP kbqa_cache_hit_rate Cache hit rate (0.0 to 1.0)\n");
        output.push_str("# TYPE kbqa_cache_hit_rate gauge\n");
        output.push_str(&format!("kbqa_cache_hit_rate {hit_rate:.4}\n\n"));
    }

    // Per-endpoint metrics, sorted so scrapes are stable
    let metrics = state.metrics.read().await;
    let mut endpoints: Vec<_> = metrics.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));

    output.push_str("# HELP kbqa_http_requests_total HTTP requests by endpoint and status\n");
    output.push_str("# TYPE kbqa_http_requests_total counter\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        let mut statuses: Vec<_> = endpoint_metrics.status_counts.iter().collect();
        statuses.sort();
        for (status, count) in statuses {
            output.push_str(&format!(
                "kbqa_http_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}\n"
            ));
        }
    }
    output.push('\n');

    output.push_str("# HELP kbqa_http_request_duration_seconds HTTP request latency\n");
    output.push_str("# TYPE kbqa_http_request_duration_seconds summary\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        if endpoint_metrics.latency_count == 0 {
            continue;
        }
        let total_sum_s = endpoint_metrics.total_latency_us as f64 / 1_000_000.0;
        output.push_str(&format!(
            "kbqa_http_request_duration_seconds_sum{{endpoint=\"{endpoint}\"}} {total_sum_s:.6}\n"
        ));
        output.push_str(&format!(
            "kbqa_http_request_duration_seconds_count{{endpoint=\"{}\"}} {}\n",
            endpoint, endpoint_metrics.latency_count
        ));
    }
    output.push('\n');

    output.push_str("# HELP kbqa_http_request_duration_seconds_max Slowest request per endpoint\n");
    output.push_str("# TYPE kbqa_http_request_duration_seconds_max gauge\n");
    for (endpoint, endpoint_metrics) in &endpoints {
        if endpoint_metrics.latency_count == 0 {
            continue;
        }
        output.push_str(&format!(
            "kbqa_http_request_duration_seconds_max{{endpoint=\"{}\"}} {:.6}\n",
            endpoint,
            endpoint_metrics.max_latency_us as f64 / 1_000_000.0
        ));
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}
