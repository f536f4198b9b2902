//! Model Context Protocol (MCP) client support.
//!
//! Connects the agent to a remote tool service speaking JSON-RPC 2.0 over
//! streamable HTTP.
//!
//! - [`McpClient`] - session-aware client (handshake, tool listing, calls)
//! - [`McpTransport`] - trait for transport implementations
//! - [`HttpTransport`] - POST-per-message transport with a pooled HTTP client
//! - [`McpToolHandle`] - wrapper to use a remote tool as a [`crate::Tool`]
//!
//! # Example
//!
//! ```ignore
//! use agent_bridge::mcp::{HttpTransport, McpClient, convert_tools};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(HttpTransport::new(settings.mcp.clone())?);
//! let client = Arc::new(McpClient::new(transport));
//!
//! let registry = convert_tools(client.list_tools().await, &client);
//! ```
//!
//! # MCP Protocol
//!
//! Protocol version 2024-11-05:
//!
//! - `initialize` handshake followed by `notifications/initialized`
//! - Session id carried in the `Mcp-Session-Id` header
//! - Tool discovery via `tools/list`
//! - Tool execution via `tools/call`

pub mod client;
pub mod protocol;
pub mod tool_bridge;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::{MCP_PROTOCOL_VERSION, McpClient};
pub use protocol::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDefinition,
};
pub use tool_bridge::{MAX_TOOL_RESULT_CHARS, McpToolHandle, convert_tools, extract_text_content};
pub use transport::{HttpTransport, McpTransport, SESSION_HEADER, TransportReply};
