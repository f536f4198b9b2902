//! Live transport gateway.
//!
//! Each client connection gets its own MCP session and tool handles, shares
//! the process-wide [`AgentDriver`], and runs one receive loop:
//!
//! - an idle period of `idle_timeout` sends a `ping` and keeps waiting
//! - a frame that does not parse sends an `error` and keeps waiting
//! - a `message` frame runs a chat invocation and relays every event
//! - a `close` frame or a disconnect ends the loop

pub mod connection;
pub mod routes;

pub use connection::{ClientConnection, Inbound, WsConnection};
pub use routes::router;

use crate::agent_loop::{AgentDriver, ChatAgent};
use crate::config::Settings;
use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::mcp::{McpClient, McpToolDefinition, McpTransport, convert_tools};
use crate::types::ChatMessage;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Shared services every connection is served with.
pub struct Gateway {
    transport: Arc<dyn McpTransport>,
    driver: Arc<AgentDriver>,
    idle_timeout: Duration,
    credential_configured: bool,
}

impl Gateway {
    #[must_use]
    pub fn new(
        transport: Arc<dyn McpTransport>,
        driver: Arc<AgentDriver>,
        idle_timeout: Duration,
        credential_configured: bool,
    ) -> Self {
        Self {
            transport,
            driver,
            idle_timeout,
            credential_configured,
        }
    }

    #[must_use]
    pub fn from_settings(
        settings: &Settings,
        transport: Arc<dyn McpTransport>,
        driver: Arc<AgentDriver>,
    ) -> Self {
        Self::new(
            transport,
            driver,
            settings.server.idle_timeout,
            settings.llm.has_credential(),
        )
    }

    #[must_use]
    pub fn driver(&self) -> &AgentDriver {
        &self.driver
    }

    /// Tools offered by the remote service, fetched over a fresh session.
    /// Empty if the service is unavailable.
    pub async fn list_tools(&self) -> Vec<McpToolDefinition> {
        McpClient::new(Arc::clone(&self.transport)).list_tools().await
    }

    /// Whether the remote tool service answers its health probe.
    pub async fn mcp_healthy(&self) -> bool {
        self.transport.health().await
    }

    /// Serve one client until it closes, disconnects or fails. The connection
    /// is closed on every exit path.
    pub async fn serve_connection<C: ClientConnection>(&self, mut conn: C) {
        info!("Client connected");
        if let Err(e) = self.run_connection(&mut conn).await {
            error!("Connection loop failed: {e:#}");
        }
        conn.close().await;
        info!("Client connection closed");
    }

    async fn run_connection<C: ClientConnection>(&self, conn: &mut C) -> Result<()> {
        let client = Arc::new(McpClient::new(Arc::clone(&self.transport)));
        client.reset_session().await;

        let definitions = client.list_tools().await;
        let tools = convert_tools(definitions, &client);
        info!("Connection bound to {} tools", tools.len());

        let agent = if self.credential_configured {
            match self.driver.initialize(tools).await {
                Ok(agent) => Some(agent),
                Err(e) => {
                    error!("Agent initialization failed: {e}");
                    conn.send(&AgentEvent::error(format!(
                        "agent initialization failed: {e}"
                    )))
                    .await?;
                    return Ok(());
                }
            }
        } else {
            warn!("No model credential configured; chat messages will be rejected");
            None
        };

        loop {
            let frame = match tokio::time::timeout(self.idle_timeout, conn.recv()).await {
                Err(_) => {
                    debug!("Client idle, sending ping");
                    conn.send(&AgentEvent::Ping).await?;
                    continue;
                }
                Ok(frame) => frame?,
            };
            let Some(text) = frame else {
                info!("Client disconnected");
                return Ok(());
            };

            let inbound = match serde_json::from_str::<Inbound>(&text) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!("Rejecting malformed frame: {e}");
                    let err = BridgeError::MalformedInput(e.to_string());
                    conn.send(&AgentEvent::error(err.to_string())).await?;
                    continue;
                }
            };

            match inbound {
                Inbound::Close => {
                    info!("Client requested close");
                    return Ok(());
                }
                Inbound::Message { messages } => {
                    let Some(agent) = &agent else {
                        let err = BridgeError::Configuration(
                            "OPENAI_API_KEY is not set".to_string(),
                        );
                        conn.send(&AgentEvent::error(err.to_string())).await?;
                        continue;
                    };
                    if messages.is_empty() {
                        let err =
                            BridgeError::MalformedInput("message frame has no messages".to_string());
                        conn.send(&AgentEvent::error(err.to_string())).await?;
                        continue;
                    }
                    relay_chat(conn, agent, messages).await?;
                }
            }
        }
    }
}

/// Run one chat invocation and forward its events in order.
///
/// Failures inside the invocation were already relayed as `error` events;
/// only a failed send to the client is returned.
async fn relay_chat<C: ClientConnection>(
    conn: &mut C,
    agent: &ChatAgent,
    messages: Vec<ChatMessage>,
) -> Result<()> {
    let mut run = agent.run(messages);
    while let Some(event) = run.events.recv().await {
        conn.send(&event).await?;
    }

    match run.outcome.await {
        Ok(Ok(summary)) => debug!(
            "Chat finished (rounds={}, tool_calls={}, fallback_calls={})",
            summary.rounds, summary.tool_calls, summary.fallback_calls
        ),
        Ok(Err(e)) => warn!("Chat ended with error: {e}"),
        Err(_) => warn!("Chat task ended without reporting an outcome"),
    }
    Ok(())
}
