//! Question answering and search handlers

use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, Json};
use kbqa_core::QueryResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

/// Query request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// User's question
    #[schema(example = "What is a mutable sequence?")]
    pub question: String,

    /// Passages to retrieve (defaults to the configured top_k)
    #[schema(example = 5)]
    pub top_k: Option<usize>,
}

/// A retrieved passage shown alongside an answer
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Passage {
    pub text: String,

    /// Cosine similarity to the question
    #[schema(example = 0.82)]
    pub score: f32,

    /// Position of the chunk within its document
    pub chunk_index: u32,

    pub document_id: String,
}

impl From<&QueryResult> for Passage {
    fn from(result: &QueryResult) -> Self {
        Self {
            text: result.chunk.text.clone(),
            score: result.score,
            chunk_index: result.chunk.chunk_index,
            document_id: result.chunk.document_id.to_string(),
        }
    }
}

/// Query response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    /// Generated answer, or the fallback text when nothing relevant was found
    pub answer: String,

    /// False when the answer is the fallback
    pub grounded: bool,

    /// Passages the answer was composed from, most relevant first
    pub passages: Vec<Passage>,

    /// Processing time in milliseconds
    #[schema(example = 1250)]
    pub processing_time_ms: u64,
}

/// Answer a question from the knowledge base
#[utoipa::path(
    post,
    path = "/api/v1/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query successful", body = QueryResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 502, description = "Generation failed", body = crate::error::ApiError),
        (status = 503, description = "Embedding backend unavailable", body = crate::error::ApiError)
    )
)]
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let answer = state.composer().answer(&req.question, req.top_k).await?;

    tracing::info!(
        grounded = answer.grounded,
        passages = answer.passages.len(),
        elapsed_ms = answer.processing_time_ms,
        "Answered query"
    );

    Ok(Json(QueryResponse {
        passages: answer.passages.iter().map(Passage::from).collect(),
        answer: answer.text,
        grounded: answer.grounded,
        processing_time_ms: answer.processing_time_ms,
    }))
}

/// Search request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    #[schema(example = "mutable sequence")]
    pub query: String,

    /// Maximum results (defaults to the configured top_k)
    pub top_k: Option<usize>,
}

/// Search response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub results: Vec<Passage>,
    pub total: usize,
    pub processing_time_ms: u64,
}

/// Similarity search without generation
#[utoipa::path(
    post,
    path = "/api/v1/search",
    tag = "query",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Search successful", body = SearchResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 503, description = "Embedding backend unavailable", body = crate::error::ApiError)
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let start = Instant::now();
    let composer = state.composer();
    let max_top_k = composer.config().max_top_k;

    let k = req.top_k.unwrap_or(composer.config().top_k);
    if k == 0 || k > max_top_k {
        return Err(AppError::BadRequest(format!(
            "top_k must be between 1 and {max_top_k}"
        )));
    }

    let results = state.retrieval().search(&req.query, k).await?;
    let results: Vec<Passage> = results.iter().map(Passage::from).collect();

    Ok(Json(SearchResponse {
        total: results.len(),
        results,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
