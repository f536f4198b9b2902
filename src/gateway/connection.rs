//! Live client connections.

use crate::events::AgentEvent;
use crate::types::ChatMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use serde::Deserialize;

/// A bidirectional client stream carrying text frames in and events out.
#[async_trait]
pub trait ClientConnection: Send {
    /// Next inbound text frame, or `None` once the client has disconnected.
    async fn recv(&mut self) -> Result<Option<String>>;

    async fn send(&mut self, event: &AgentEvent) -> Result<()>;

    /// Close the stream. Called exactly once when the connection loop ends.
    async fn close(&mut self);
}

/// Inbound frames, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Run one chat invocation over the full conversation history
    Message {
        #[serde(default)]
        messages: Vec<ChatMessage>,
    },
    Close,
}

/// [`ClientConnection`] over an axum WebSocket.
pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    #[must_use]
    pub const fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl ClientConnection for WsConnection {
    async fn recv(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.socket.recv().await {
            match frame.context("WebSocket receive failed")? {
                WsMessage::Text(text) => return Ok(Some(text)),
                WsMessage::Binary(bytes) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                WsMessage::Close(_) => return Ok(None),
                // axum answers pings itself
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
        Ok(None)
    }

    async fn send(&mut self, event: &AgentEvent) -> Result<()> {
        let text = serde_json::to_string(event).context("failed to serialize event")?;
        self.socket
            .send(WsMessage::Text(text))
            .await
            .context("WebSocket send failed")
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(WsMessage::Close(None)).await {
            log::debug!("WebSocket already closed: {e}");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatRole;

    #[test]
    fn test_message_frame_parses_history() -> Result<()> {
        let frame: Inbound = serde_json::from_str(
            r#"{"type": "message", "messages": [{"role": "user", "content": "find cats"}]}"#,
        )?;
        let Inbound::Message { messages } = frame else {
            anyhow::bail!("expected message frame");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        Ok(())
    }

    #[test]
    fn test_close_and_unknown_frames() {
        assert_eq!(
            serde_json::from_str::<Inbound>(r#"{"type": "close"}"#).ok(),
            Some(Inbound::Close)
        );
        assert!(serde_json::from_str::<Inbound>(r#"{"type": "subscribe"}"#).is_err());
        assert!(serde_json::from_str::<Inbound>("not json").is_err());
    }

    #[test]
    fn test_message_without_history_defaults_to_empty() -> Result<()> {
        let frame: Inbound = serde_json::from_str(r#"{"type": "message"}"#)?;
        assert_eq!(frame, Inbound::Message { messages: vec![] });
        Ok(())
    }
}
