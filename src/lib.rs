//! Agent Bridge - streams a tool-calling LLM agent to live clients.
//!
//! This crate provides:
//! - A session client for remote MCP tool services over JSON-RPC
//! - An adapter that turns remote tool descriptors into callable tools
//! - A conversational agent driver with JSON-fallback recovery for models
//!   without reliable function calling
//! - A WebSocket gateway relaying agent events to clients
//!
//! # Example
//!
//! ```ignore
//! use agent_bridge::{AgentDriver, Gateway, Settings, gateway, mcp::HttpTransport};
//! use agent_bridge::providers::OpenAIProviderFactory;
//!
//! let settings = Settings::from_env()?;
//! let transport = Arc::new(HttpTransport::new(settings.mcp.clone())?);
//! let driver = Arc::new(AgentDriver::new(
//!     settings.agent.clone(),
//!     Arc::new(OpenAIProviderFactory::new(settings.llm.clone())),
//! ));
//! let gateway = Arc::new(Gateway::from_settings(&settings, transport, driver));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:18061").await?;
//! axum::serve(listener, gateway::router(gateway)).await?;
//! ```

#![forbid(unsafe_code)]

mod agent_loop;
pub mod config;
pub mod error;
mod events;
pub mod gateway;
pub mod llm;
pub mod mcp;
pub mod providers;
mod tools;
mod types;

pub use agent_loop::{AgentDriver, AgentInstance, ChatAgent, ChatRun, ChatSummary};
pub use config::Settings;
pub use error::BridgeError;
pub use events::{AgentEvent, MAX_RELAYED_TOOL_OUTPUT, ToolCallEvent, ToolCallOutcome};
pub use gateway::Gateway;
pub use llm::LlmProvider;
pub use tools::{ParamField, ParamType, ParameterSchema, Tool, ToolRegistry, ToolSpec};
pub use types::{
    AgentConfig, ChatMessage, ChatRole, DEFAULT_SYSTEM_PROMPT, ToolCallRequest, ToolResult,
};
