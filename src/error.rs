//! Error taxonomy shared by the session client, the agent driver and the gateway.

/// Failures surfaced at component boundaries.
///
/// Inside providers and tool implementations errors travel as `anyhow::Error`;
/// they are classified into one of these variants where they cross into the
/// driver or the gateway.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The remote tool service is unreachable or answered with an HTTP failure.
    #[error("tool service unreachable: {0}")]
    Connectivity(String),

    /// The remote tool service returned a JSON-RPC error object.
    #[error("tool service error {code}: {message}")]
    RemoteProtocol { code: i32, message: String },

    /// Missing or invalid process configuration, e.g. no model credential.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An inbound message could not be parsed or failed validation.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// JSON fallback could not map model output onto an available tool.
    #[error("no tool matches fallback payload: {0}")]
    ToolResolution(String),

    /// Anything else that went wrong while the agent was running.
    #[error("agent execution failed: {0}")]
    AgentExecution(String),
}

impl BridgeError {
    /// Whether the caller may reasonably retry the same operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    pub(crate) fn remote(code: i32, message: impl Into<String>) -> Self {
        Self::RemoteProtocol {
            code,
            message: message.into(),
        }
    }
}
