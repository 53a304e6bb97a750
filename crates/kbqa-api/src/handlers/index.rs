//! Index management handlers

use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, Json};
use kbqa_core::IngestionReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

/// Index statistics response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IndexStatsResponse {
    pub collection: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_count: usize,
    pub document_count: usize,
    pub cache_hits: Option<u64>,
    pub cache_misses: Option<u64>,
}

/// Report current index contents
#[utoipa::path(
    get,
    path = "/api/v1/index/stats",
    tag = "index",
    responses(
        (status = 200, description = "Index statistics", body = IndexStatsResponse)
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Json<IndexStatsResponse> {
    let stats = state.retrieval().stats().await;

    Json(IndexStatsResponse {
        collection: stats.collection.name,
        embedding_model: stats.collection.embedding_model,
        dimension: stats.collection.dimension,
        chunk_count: stats.chunk_count,
        document_count: stats.document_count,
        cache_hits: stats.cache.as_ref().map(|c| c.hits),
        cache_misses: stats.cache.as_ref().map(|c| c.misses),
    })
}

/// A document skipped during reindexing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FailureEntry {
    pub source_path: String,
    pub reason: String,
}

/// Reindex response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReindexResponse {
    pub documents_ingested: usize,
    pub chunks_indexed: usize,
    pub failures: Vec<FailureEntry>,
    pub processing_time_ms: u64,
}

impl ReindexResponse {
    fn from_report(report: IngestionReport, processing_time_ms: u64) -> Self {
        Self {
            documents_ingested: report.documents_ingested,
            chunks_indexed: report.chunks_indexed,
            failures: report
                .failures
                .into_iter()
                .map(|f| FailureEntry {
                    source_path: f.source_path,
                    reason: f.reason,
                })
                .collect(),
            processing_time_ms,
        }
    }
}

/// Rebuild the index from the documents directory
#[utoipa::path(
    post,
    path = "/api/v1/index/reindex",
    tag = "index",
    responses(
        (status = 200, description = "Index rebuilt", body = ReindexResponse),
        (status = 500, description = "Reindex failed", body = crate::error::ApiError)
    )
)]
pub async fn reindex_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReindexResponse>, AppError> {
    let start = Instant::now();
    let report = state.kb.rebuild().await?;

    tracing::info!(
        documents = report.documents_ingested,
        chunks = report.chunks_indexed,
        failures = report.failures.len(),
        "Reindex complete"
    );

    Ok(Json(ReindexResponse::from_report(
        report,
        start.elapsed().as_millis() as u64,
    )))
}
