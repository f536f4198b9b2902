//! Provider-neutral chat types.
//!
//! The agent driver builds conversations out of these and every provider maps
//! them onto its own wire format. Tool results ride on a `User` message as
//! [`ContentBlock::ToolResult`]; backends with a dedicated tool role split
//! them out when encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::iter;

/// Input of one model call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Sent ahead of `messages`; empty means no system prompt
    pub system: String,
    pub messages: Vec<Message>,
    /// `None` calls the model without function calling
    pub tools: Option<Vec<Tool>>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Assistant turn requesting one tool, after whatever text the model
    /// produced alongside the request.
    #[must_use]
    pub fn assistant_with_tool_use(
        text: Option<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> Self {
        let request = ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        };
        let blocks = text
            .map(|text| ContentBlock::Text { text })
            .into_iter()
            .chain(iter::once(request))
            .collect();
        Self {
            role: Role::Assistant,
            content: Content::Blocks(blocks),
        }
    }

    /// Answer to the tool call `tool_use_id`.
    #[must_use]
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::User,
            content: Content::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: is_error.then_some(true),
            }]),
        }
    }

    /// Leading text of the message, if it has any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.first_text()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Blocks(blocks) => blocks.iter().find_map(ContentBlock::as_text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        /// Correlation id echoed by the matching result
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        /// Only present when the tool failed
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A function the model may call. `input_schema` is a JSON Schema object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A complete, non-streamed model answer.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

impl ChatResponse {
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Add `other` into `self`, saturating instead of overflowing.
    pub fn accumulate(&mut self, other: &Self) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// How a non-streaming call ended. Transport failures are reported as `Err`
/// by the provider instead.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Success(ChatResponse),
    /// HTTP 429
    RateLimited,
    /// Other 4xx; retrying the same request will not help
    InvalidRequest(String),
    /// 5xx
    ServerError(String),
}
