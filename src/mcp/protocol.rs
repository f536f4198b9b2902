//! Wire types for the subset of MCP this bridge speaks: the `initialize`
//! handshake, `tools/list` and `tools/call`, all as JSON-RPC 2.0 messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing message. Calls carry an `id`, notifications do not and get no
/// answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Left empty by callers of [`JsonRpcRequest::call`]; the transport
    /// numbers each call it sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// A call awaiting a response.
    #[must_use]
    pub fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(RequestId::Number(0)),
        }
    }

    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            ..Self::call(method, params)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// `null` when the server could not read the request id
    #[serde(default)]
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// The result payload, or the error object if the server sent one. A
    /// response with neither yields `{}`.
    ///
    /// # Errors
    ///
    /// Returns the server's error object.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Object(serde_json::Map::new())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
}

/// A tool as advertised by `tools/list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema of the arguments; `null` when the server sent none
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Declares tool support and nothing else; serializes as `{"tools": {}}`.
#[derive(Clone, Debug, Serialize)]
pub struct ClientCapabilities {
    pub tools: Value,
}

impl ClientCapabilities {
    #[must_use]
    pub fn tools_only() -> Self {
        Self {
            tools: Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// What the server reports about itself. Servers differ in what they fill
/// in, so nothing is required.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Entries stay raw so one malformed descriptor does not sink the listing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<Value>,
}

impl ToolsListResult {
    /// The descriptors that decode; the rest are logged and skipped.
    #[must_use]
    pub fn definitions(self) -> Vec<McpToolDefinition> {
        self.tools
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<McpToolDefinition>(raw.clone()) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    log::warn!("Skipping malformed MCP tool descriptor {raw}: {e}");
                    None
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolCallParams<'a> {
    pub name: &'a str,
    pub arguments: Value,
}
