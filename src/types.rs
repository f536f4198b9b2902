//! Core types shared across the bridge.
//!
//! - [`ChatMessage`]: a message as the live client sends it
//! - [`AgentConfig`]: bounds and prompt for the agent driver
//! - [`ToolResult`]: result returned from tool execution

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default prompt bound to every agent instance.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a content assistant for a social feed platform. You help users search, browse and manage feed content.

When the user asks for anything that needs live data, searching, viewing details or publishing, you must use the available tools instead of answering from memory. Never tell the user you cannot do it; call the matching tool.

Available tools:
- search_feeds: search feed content (requires a keyword)
- get_feed_detail: fetch the details of one post (requires feed_id)
- list_feeds: fetch the recommended home feed
- publish_content: publish an image/text post

Rules:
1. For search requests, call search_feeds immediately.
2. For detail requests, call get_feed_detail immediately.
3. For home feed requests, call list_feeds immediately.
4. For publish requests, call publish_content immediately.
5. Do not claim an operation is impossible without calling a tool.

If you cannot call tools directly (your model has no function calling), reply with a single JSON object instead:
- to search: {"keyword": "search terms"}
- to view details: {"feed_id": "post id"}
- to query: {"query": "query terms"} (treated as a search)"#;

/// Role of a message in the client protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by an assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One message of the conversation history sent by the live client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    /// `null` is read as empty; assistant turns carrying `tool_calls` often send it.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    /// Correlation id; required for `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    const fn with_role(role: ChatRole, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, content.into())
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, content.into())
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ChatRole::Assistant, content.into())
    }

    /// A tool answer for the call `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(ChatRole::Tool, content.into())
        }
    }
}

/// Configuration for the agent driver
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Maximum number of rounds per chat invocation, JSON-fallback rounds included
    pub max_rounds: usize,
    /// Maximum model round-trips inside one round while the model keeps calling tools
    pub max_tool_turns: usize,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// System prompt for the agent
    pub system_prompt: String,
    /// Stream model tokens as they arrive.
    ///
    /// When `false`, the complete response text is emitted as one `content` event.
    pub streaming: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_tool_turns: 10,
            max_tokens: 4096,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            streaming: true,
        }
    }
}

/// What a tool invocation produced. Failures the tool reports itself are
/// results too, with `success` unset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Text relayed to the client and fed back to the model
    pub output: String,
    /// Structured payload, when the tool returned one
    pub data: Option<Value>,
    /// Wall time of the invocation
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    const fn new(success: bool, output: String, data: Option<Value>) -> Self {
        Self {
            success,
            output,
            data,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self::new(true, output.into(), None)
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: Value) -> Self {
        Self::new(true, output.into(), Some(data))
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(false, message.into(), None)
    }

    #[must_use]
    pub fn with_duration(self, duration_ms: u64) -> Self {
        Self {
            duration_ms: Some(duration_ms),
            ..self
        }
    }
}

/// Returns the prefix of `text` holding at most `max_chars` characters, or
/// `None` when the text already fits.
#[must_use]
pub fn char_prefix(text: &str, max_chars: usize) -> Option<&str> {
    text.char_indices()
        .nth(max_chars)
        .map(|(byte_idx, _)| &text[..byte_idx])
}
