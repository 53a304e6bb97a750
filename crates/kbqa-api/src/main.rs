//! kbqa API Server
//!
//! Loads configuration, builds the knowledge base once and serves it over HTTP.

use anyhow::Context;
use kbqa_api::{create_router, state::AppState};
use kbqa_core::AppConfig;
use kbqa_rag::KnowledgeBase;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("KBQA_CONFIG").ok().map(PathBuf::from);
    let config = AppConfig::load(config_path).context("failed to load configuration")?;
    config.logging.init();
    config.validate().context("invalid configuration")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let kb = KnowledgeBase::open(config)
        .await
        .context("failed to build knowledge base")?;
    let state = Arc::new(AppState::new(kb));
    state.set_ready(true);

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("kbqa API server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
    state.set_ready(false);
}
