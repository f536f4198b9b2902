//! Agent Bridge server
//!
//! Composition root: reads settings, builds the shared services and serves
//! the HTTP and WebSocket routes until Ctrl-C.

use agent_bridge::mcp::HttpTransport;
use agent_bridge::providers::OpenAIProviderFactory;
use agent_bridge::{AgentDriver, Gateway, Settings, gateway};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    if let Some(e) = dotenv_failure(&dotenv) {
        tracing::warn!(error = %e, "Ignoring unreadable .env file");
    }

    tracing::info!(
        mcp = %settings.mcp.endpoint(),
        model = %settings.llm.model,
        credential = settings.llm.has_credential(),
        "Starting agent bridge"
    );
    if !settings.llm.has_credential() {
        tracing::warn!("OPENAI_API_KEY is not set; chat messages will be rejected");
    }

    let transport = Arc::new(HttpTransport::new(settings.mcp.clone())?);
    let driver = Arc::new(AgentDriver::new(
        settings.agent.clone(),
        Arc::new(OpenAIProviderFactory::new(settings.llm.clone())),
    ));
    let gateway = Arc::new(Gateway::from_settings(&settings, transport, driver));

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, gateway::router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// A missing `.env` is normal; anything else is worth reporting.
fn dotenv_failure<T>(result: &Result<T, dotenvy::Error>) -> Option<&dotenvy::Error> {
    result.as_ref().err().filter(|e| !e.not_found())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
