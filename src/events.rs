//! Events relayed to the live client.
//!
//! The [`AgentEvent`] enum is the only shape that leaves the bridge towards a
//! client. Every variant serializes as a flat object with a `type` field.
//!
//! # Event Flow
//!
//! A typical chat invocation looks like:
//! 1. `Content` - model text, possibly many fragments
//! 2. `ToolCall` start / end pairs while tools run
//! 3. `Done` - exactly once, also after an `Error`
//!
//! `Ping` is emitted by the gateway while the client is idle.

use crate::types::char_prefix;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum characters of tool output relayed in a `tool_call` end event.
pub const MAX_RELAYED_TOOL_OUTPUT: usize = 10_000;

const RELAY_TRUNCATION_MARKER: &str = "\n\n... (truncated)";

/// Events emitted towards the client during a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental model text
    Content { content: String },

    /// A tool invocation started or finished
    ToolCall(ToolCallEvent),

    /// The chat invocation finished
    Done,

    /// A recoverable or terminal failure
    Error { error: String },

    /// Idle heartbeat
    Ping,
}

/// Payload of a `tool_call` event; start and end share the event type and
/// are told apart by their fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolCallEvent {
    End {
        tool_name: String,
        result: ToolCallOutcome,
    },
    Start {
        tool_name: String,
        arguments: Value,
    },
}

/// Result block of a finished tool call as relayed to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub success: bool,
    pub content: String,
    /// Whether `content` was cut to [`MAX_RELAYED_TOOL_OUTPUT`] characters
    pub truncated: bool,
}

impl ToolCallOutcome {
    /// Builds the relayed outcome, capping the content.
    #[must_use]
    pub fn new(success: bool, output: &str) -> Self {
        match char_prefix(output, MAX_RELAYED_TOOL_OUTPUT) {
            Some(prefix) => Self {
                success,
                content: format!("{prefix}{RELAY_TRUNCATION_MARKER}"),
                truncated: true,
            },
            None => Self {
                success,
                content: output.to_string(),
                truncated: false,
            },
        }
    }
}

impl AgentEvent {
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self::Content {
            content: content.into(),
        }
    }

    #[must_use]
    pub fn tool_call_start(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall(ToolCallEvent::Start {
            tool_name: tool_name.into(),
            arguments,
        })
    }

    #[must_use]
    pub fn tool_call_end(tool_name: impl Into<String>, success: bool, output: &str) -> Self {
        Self::ToolCall(ToolCallEvent::End {
            tool_name: tool_name.into(),
            result: ToolCallOutcome::new(success, output),
        })
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Wire name of the event's `type` field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall(_) => "tool_call",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
        }
    }

    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
