//! Plant-care assistant HTTP Server
//!
//! Axum-based server providing the chat REST API, a WebSocket stream and
//! knowledge-base document routes. Documents under `KNOWLEDGE_DIR` are
//! ingested at startup.

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_access::{RateLimiter, TokenVerifier};
use agent_core::{AgentBuilder, ChatSessionStore, EmbeddingProvider, LlmProvider, MemorySessionStore};
use agent_runtime::{OllamaEmbedder, OllamaProvider, SqliteSessionStore};
use plant_advisor::{HashingEmbedder, KnowledgeBase, PLANT_CARE_PROMPT, tool_table};

use crate::config::{EmbeddingBackend, ServerConfig};
use crate::state::AppState;

/// How often idle rate-limit windows are dropped
const LIMITER_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment first so RUST_LOG from .env applies
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    // Initialize LLM provider
    let provider = Arc::new(OllamaProvider::from_config(config.ollama.clone()));
    match provider.health_check().await {
        Ok(true) => {
            tracing::info!(model = %config.ollama.model, "✓ Connected to Ollama");
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Ollama not available - chat requests will fail until it is");
            tracing::warn!("  Make sure Ollama is running: ollama serve");
        }
    }

    // Knowledge base
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding {
        EmbeddingBackend::Ollama => Arc::new(OllamaEmbedder::from_config(&config.ollama)?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::default()),
    };
    let knowledge = Arc::new(KnowledgeBase::in_memory(embedder, config.retrieval.clone()));
    tracing::info!(embedding_model = %knowledge.embedding_model(), "Knowledge base ready");

    if let Some(dir) = &config.knowledge_dir {
        match knowledge.ingest_dir(dir).await {
            Ok(report) => {
                tracing::info!(
                    dir = %dir.display(),
                    documents = report.documents.len(),
                    skipped = report.skipped.len(),
                    "Startup ingestion finished"
                );
                for (path, reason) in &report.skipped {
                    tracing::warn!(path = %path.display(), %reason, "Skipped document");
                }
            }
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Startup ingestion failed"),
        }
    } else {
        tracing::warn!("KNOWLEDGE_DIR not set - starting with an empty knowledge base");
    }

    // Chat history
    let sessions: Arc<dyn ChatSessionStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("✓ Chat history in SQLite");
            Arc::new(SqliteSessionStore::connect(url).await?)
        }
        None => {
            tracing::warn!("⚠ DATABASE_URL not set - chat history is kept in memory");
            Arc::new(MemorySessionStore::new())
        }
    };

    // Agent with the plant-care tools
    let tools = tool_table(knowledge.clone());
    tracing::info!("Registered {} tools:", tools.len());
    for schema in tools.schemas() {
        tracing::info!("  • {}", schema.name);
    }

    let agent = AgentBuilder::new()
        .provider(provider)
        .tools(tools)
        .system_prompt(PLANT_CARE_PROMPT)
        .model(&config.ollama.model)
        .max_steps(config.max_steps)
        .build()?;

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limits));
    spawn_limiter_purge(limiter.clone());

    let state = AppState {
        agent: Arc::new(agent),
        knowledge,
        sessions,
        verifier: Arc::new(TokenVerifier::new(&config.jwt_secret)?),
        limiter,
        request_timeout: config.request_timeout,
    };

    let app = routes::router(state, &config.cors_origins);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🌱 plant-care assistant running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                         - Health check");
    tracing::info!("  POST   {}            - Send message", routes::CHAT);
    tracing::info!("  GET    {}     - WebSocket streaming", routes::CHAT_STREAM);
    tracing::info!("  GET    {}        - Session history", routes::MESSAGES);
    tracing::info!("  DELETE {}        - Clear session", routes::MESSAGES);
    tracing::info!("  GET    {}        - List sessions", routes::SESSIONS);
    tracing::info!("  GET    {}               - List documents", routes::DOCUMENTS);
    tracing::info!("  POST   {}               - Add document", routes::DOCUMENTS);
    tracing::info!("  DELETE {}      - Remove document", routes::DOCUMENT);
    tracing::info!("");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn spawn_limiter_purge(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.purge_idle(Instant::now());
            tracing::debug!(keys = limiter.tracked_keys(), "Rate limiter purged");
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
