//! MCP client implementation.

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::protocol::{
    ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, McpToolDefinition, ToolCallParams, ToolsListResult,
};
use super::transport::{McpTransport, TransportReply};
use crate::error::BridgeError;

/// MCP protocol version.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
    session_id: Option<String>,
    server_info: Option<InitializeResult>,
}

/// Session-oriented client for a remote MCP tool service.
///
/// The session starts uninitialized. The first operation that needs it runs
/// the `initialize` handshake; a failed handshake leaves the session
/// uninitialized so the next call retries. Once a session id is known it is
/// sent with every request.
///
/// # Example
///
/// ```ignore
/// use agent_bridge::mcp::{HttpTransport, McpClient};
///
/// let transport = Arc::new(HttpTransport::new(settings.mcp.clone())?);
/// let client = McpClient::new(transport);
///
/// let tools = client.list_tools().await;
/// let result = client.call_tool("search_feeds", json!({"keyword": "cats"})).await?;
/// ```
pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    client_info: ClientInfo,
    state: Mutex<SessionState>,
}

impl McpClient {
    #[must_use]
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Run the handshake unless the session is already initialized.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connectivity`] on transport failure and
    /// [`BridgeError::RemoteProtocol`] if the server rejects the handshake.
    /// The session stays uninitialized in both cases.
    pub async fn initialize_session(&self) -> Result<(), BridgeError> {
        self.ensure_session().await.map(|_| ())
    }

    /// Forget the current session. The transport and its pooled connections
    /// are kept.
    pub async fn reset_session(&self) {
        let mut state = self.state.lock().await;
        if state.initialized {
            log::info!("Resetting MCP session {:?}", state.session_id);
        }
        *state = SessionState::default();
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }

    /// Server identity reported during the handshake.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.state.lock().await.server_info.clone()
    }

    /// List the tools the server offers. Best-effort: any failure is logged
    /// and yields an empty list.
    pub async fn list_tools(&self) -> Vec<McpToolDefinition> {
        match self.try_list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                log::error!("Failed to list MCP tools: {e}");
                Vec::new()
            }
        }
    }

    /// List tools, propagating failures.
    ///
    /// # Errors
    ///
    /// Returns the handshake error, a transport error, or a JSON-RPC error.
    pub async fn try_list_tools(&self) -> Result<Vec<McpToolDefinition>, BridgeError> {
        let session_id = self.ensure_session().await?;
        let reply = self
            .transport
            .send(JsonRpcRequest::call("tools/list", None), session_id.as_deref())
            .await?;
        let listing: ToolsListResult = decode_result(reply.response, "tools/list")?;
        let offered = listing.tools.len();
        let tools = listing.definitions();
        log::info!("MCP server offers {offered} tools, {} usable", tools.len());
        Ok(tools)
    }

    /// Call a tool and return the raw `result` object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RemoteProtocol`] carrying the remote message if
    /// the server answers with a JSON-RPC error, and
    /// [`BridgeError::Connectivity`] on transport failure.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        let session_id = self.ensure_session().await?;
        let params = ToolCallParams { name, arguments };
        let request = JsonRpcRequest::call("tools/call", Some(encode(&params)?));

        log::info!("Calling MCP tool {name}");
        let reply = self.transport.send(request, session_id.as_deref()).await?;
        decode_result(reply.response, "tools/call")
    }

    /// Probe the service's health endpoint. Never fails.
    pub async fn health_check(&self) -> bool {
        self.transport.health().await
    }

    /// Returns the session id to send, running the handshake first if needed.
    /// Holding the state lock across the handshake serializes concurrent
    /// first calls into one handshake.
    async fn ensure_session(&self) -> Result<Option<String>, BridgeError> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            self.handshake(&mut state).await?;
        }
        Ok(state.session_id.clone())
    }

    async fn handshake(&self, state: &mut SessionState) -> Result<(), BridgeError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::tools_only(),
            client_info: self.client_info.clone(),
        };
        let request = JsonRpcRequest::call("initialize", Some(encode(&params)?));

        let TransportReply {
            response,
            session_id,
        } = self.transport.send(request, None).await.inspect_err(|e| {
            log::error!("MCP initialize failed: {e}");
        })?;
        let server_info: InitializeResult = decode_result(response, "initialize")?;

        match &session_id {
            Some(id) => log::info!("MCP session established: {id}"),
            None => log::warn!("MCP server returned no session id, continuing without one"),
        }

        self.transport
            .notify(
                JsonRpcRequest::notification("notifications/initialized", Some(json!({}))),
                session_id.as_deref(),
            )
            .await?;

        *state = SessionState {
            initialized: true,
            session_id,
            server_info: Some(server_info),
        };
        Ok(())
    }
}

fn encode<T: serde::Serialize>(params: &T) -> Result<Value, BridgeError> {
    serde_json::to_value(params)
        .map_err(|e| BridgeError::AgentExecution(format!("failed to encode params: {e}")))
}

/// Turns a JSON-RPC response into its typed result, mapping error objects to
/// [`BridgeError::RemoteProtocol`]. A missing result decodes from `{}`.
fn decode_result<T: serde::de::DeserializeOwned>(
    response: JsonRpcResponse,
    method: &str,
) -> Result<T, BridgeError> {
    let result = response
        .into_result()
        .map_err(|error| BridgeError::remote(error.code, error.message))?;
    serde_json::from_value(result).map_err(|e| {
        BridgeError::remote(
            super::protocol::error_codes::INVALID_REQUEST,
            format!("unexpected {method} result: {e}"),
        )
    })
}
