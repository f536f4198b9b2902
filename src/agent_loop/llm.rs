use super::helpers::send_event;
use super::types::StreamError;
use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::llm::{
    ChatOutcome, ChatRequest, ChatResponse, LlmProvider, ResponseBuilder, StreamDelta,
};
use futures::StreamExt;
use log::{debug, error, warn};
use tokio::sync::mpsc;

/// Call the model once, relaying its text as `content` events.
///
/// With `streaming` each text fragment is relayed as it arrives; otherwise
/// the complete text is relayed as a single event.
pub(super) async fn call_model(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    streaming: bool,
    tx: &mpsc::Sender<AgentEvent>,
) -> Result<ChatResponse, BridgeError> {
    if streaming {
        return process_stream(provider, request, tx)
            .await
            .map_err(|e| match e {
                StreamError::Recoverable(msg) => {
                    BridgeError::AgentExecution(format!("model temporarily unavailable: {msg}"))
                }
                StreamError::Fatal(msg) => {
                    BridgeError::AgentExecution(format!("model request rejected: {msg}"))
                }
            });
    }

    let outcome = provider
        .chat(request)
        .await
        .map_err(|e| BridgeError::AgentExecution(format!("LLM error: {e}")))?;

    let response = match outcome {
        ChatOutcome::Success(response) => response,
        ChatOutcome::RateLimited => {
            error!("Rate limited by LLM provider");
            return Err(BridgeError::AgentExecution("rate limited by model provider".to_string()));
        }
        ChatOutcome::InvalidRequest(msg) => {
            error!("Invalid request to LLM: {msg}");
            return Err(BridgeError::AgentExecution(format!("invalid request: {msg}")));
        }
        ChatOutcome::ServerError(msg) => {
            error!("LLM server error: {msg}");
            return Err(BridgeError::AgentExecution(format!("server error: {msg}")));
        }
    };

    if let Some(text) = response.first_text().filter(|t| !t.is_empty()) {
        send_event(tx, AgentEvent::content(text)).await;
    }
    Ok(response)
}

/// Drains one streaming response. Text fragments reach the client as they
/// arrive; the rest is only assembled into the returned response.
async fn process_stream(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    tx: &mpsc::Sender<AgentEvent>,
) -> Result<ChatResponse, StreamError> {
    let mut stream = provider.chat_stream(request);
    let mut builder = ResponseBuilder::new();
    let mut received: u64 = 0;
    let mut relaying = true;

    while let Some(item) = stream.next().await {
        let delta = item.map_err(|e| {
            error!("Model stream failed after {received} deltas: {e}");
            StreamError::Recoverable(format!("stream error: {e}"))
        })?;
        received += 1;

        match &delta {
            StreamDelta::TextDelta { delta: text, .. } if relaying && !text.is_empty() => {
                if tx.is_closed() {
                    warn!("Client stopped listening after {received} deltas; assembling the rest silently");
                    relaying = false;
                } else {
                    send_event(tx, AgentEvent::content(text.clone())).await;
                }
            }
            StreamDelta::Error {
                message,
                recoverable,
            } => {
                warn!("Model reported an error mid-stream (recoverable={recoverable}): {message}");
                return Err(if *recoverable {
                    StreamError::Recoverable(message.clone())
                } else {
                    StreamError::Fatal(message.clone())
                });
            }
            _ => {}
        }
        builder.push(&delta);
    }

    let response = builder.finish(provider.model());
    debug!(
        "Model stream finished: {received} deltas, {} blocks, stop_reason={:?}, output_tokens={}",
        response.content.len(),
        response.stop_reason,
        response.usage.output_tokens
    );
    Ok(response)
}
