//! threadloom - conversational agent orchestration service
//!
//! Runs model/tool turns over persisted threads and streams each turn's
//! progress to HTTP clients as Server-Sent Events.

mod api;
mod config;
mod db;
mod llm;
mod mcp;
mod runtime;
mod state_machine;
mod title_generator;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::{LlmService, LoggingService, OpenAIService};
use runtime::{DatabaseStorage, ExecutionBridge, TurnExecutor};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolDispatcher;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadloom=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded .env");
    }

    let config = AppConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Tools: built-ins first, then whatever the providers offer
    let providers = match &config.tool_providers {
        Some(path) => config::load_providers(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring tool provider configuration");
            BTreeMap::new()
        }),
        None => BTreeMap::new(),
    };
    let http = tools::http_client()?;
    let mut candidates = tools::builtin_tools(&http, config.alphavantage_api_key.as_deref());
    candidates.extend(tools::discover(&providers).await);
    let dispatcher = ToolDispatcher::new(candidates);
    tracing::info!(tools = ?dispatcher.names(), "Tool dispatcher ready");

    // Model
    if config.llm.api_key.is_none() {
        tracing::warn!("No model credential configured. Set OPENAI_API_KEY.");
    }
    let model: Arc<dyn LlmService> = Arc::new(OpenAIService::new(&config.llm)?);
    let llm = Arc::new(LoggingService::new(model));
    tracing::info!(model = %llm.model_id(), base_url = %config.llm.base_url, "Model configured");

    let executor = TurnExecutor::new(
        DatabaseStorage::new(db),
        llm,
        dispatcher,
        config.max_tool_cycles,
    )
    .with_system_prompt(config.system_prompt.clone());
    let state = AppState::new(ExecutionBridge::spawn(executor));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("threadloom listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining connections");
}
