use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::llm::{ChatResponse, Content, ContentBlock, Message, Role};
use crate::types::{ChatMessage, ChatRole};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long a full event channel may hold up the agent before an event is
/// dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool call the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct RequestedCall {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) input: Value,
}

/// The parts of a model response the round loop acts on.
#[derive(Debug, Default)]
pub(super) struct ModelTurn {
    /// Text blocks joined by newlines, `None` when there were none
    pub(super) text: Option<String>,
    pub(super) calls: Vec<RequestedCall>,
}

impl ModelTurn {
    /// A `null` tool input is read as "no arguments".
    pub(super) fn from_response(response: &ChatResponse) -> Self {
        let mut texts = Vec::new();
        let mut calls = Vec::new();
        for block in &response.content {
            match block {
                ContentBlock::Text { text } => texts.push(text.as_str()),
                ContentBlock::ToolUse { id, name, input } => calls.push(RequestedCall {
                    id: id.clone(),
                    name: name.clone(),
                    input: if input.is_null() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        input.clone()
                    },
                }),
                ContentBlock::ToolResult { .. } => {}
            }
        }
        Self {
            text: (!texts.is_empty()).then(|| texts.join("\n")),
            calls,
        }
    }
}

/// The assistant turn to keep in history for a response that used tools.
pub(super) fn assistant_message(response: &ChatResponse) -> Message {
    Message {
        role: Role::Assistant,
        content: Content::Blocks(
            response
                .content
                .iter()
                .filter(|block| !matches!(block, ContentBlock::ToolResult { .. }))
                .cloned()
                .collect(),
        ),
    }
}

pub(super) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Delivers an event without ever failing the invocation.
///
/// A closed channel means the client went away: the event is dropped and
/// the agent carries on so the invocation still finishes. A channel that
/// stays full for [`SEND_TIMEOUT`] also drops the event.
pub(super) async fn send_event(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if tx.is_closed() {
        log::debug!("Dropping {} event, client is gone", event.kind());
        return;
    }
    match tokio::time::timeout(SEND_TIMEOUT, tx.send(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(mpsc::error::SendError(event))) => {
            log::debug!("Dropping {} event, client disconnected", event.kind());
        }
        Err(_) => log::error!("Event channel stayed full for {SEND_TIMEOUT:?}, dropping event"),
    }
}

/// Sends `done` exactly once per chat invocation.
///
/// [`DoneGuard::finish`] is the normal path. If the invocation task is
/// dropped first (panic or runtime shutdown), `Drop` makes a last
/// non-blocking attempt.
pub(super) struct DoneGuard {
    tx: mpsc::Sender<AgentEvent>,
    sent: bool,
}

impl DoneGuard {
    pub(super) const fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx, sent: false }
    }

    pub(super) async fn finish(mut self) {
        self.sent = true;
        send_event(&self.tx, AgentEvent::Done).await;
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if !self.sent {
            log::warn!("Chat invocation ended without finishing, sending done");
            let _ = self.tx.try_send(AgentEvent::Done);
        }
    }
}

/// Convert client messages to model-native messages.
///
/// Assistant messages that carry tool calls become tool-use blocks; tool
/// messages become tool results and must name the call they answer.
pub(super) fn convert_messages(messages: &[ChatMessage]) -> Result<Vec<Message>, BridgeError> {
    messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| match msg.role {
            ChatRole::System => Ok(Message::system(msg.content.clone())),
            ChatRole::User => Ok(Message::user(msg.content.clone())),
            ChatRole::Assistant => Ok(match msg.tool_calls.as_deref() {
                Some(calls) if !calls.is_empty() => {
                    let mut blocks = Vec::with_capacity(calls.len() + 1);
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    blocks.extend(calls.iter().map(|call| ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    }));
                    Message {
                        role: Role::Assistant,
                        content: Content::Blocks(blocks),
                    }
                }
                _ => Message::assistant(msg.content.clone()),
            }),
            ChatRole::Tool => {
                let id = msg
                    .tool_call_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        BridgeError::MalformedInput(format!(
                            "tool message at index {idx} has no tool_call_id"
                        ))
                    })?;
                Ok(Message::tool_result(id, msg.content.clone(), false))
            }
        })
        .collect()
}
