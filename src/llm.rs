pub mod streaming;
pub mod types;

pub use streaming::{ResponseBuilder, StreamBox, StreamDelta};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// A chat-completion backend.
///
/// `chat_stream` has a default implementation that performs one `chat` call
/// and replays the response as stream deltas, so backends without streaming
/// support only implement `chat`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;

    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        Box::pin(async_stream::stream! {
            match self.chat(request).await {
                Ok(ChatOutcome::Success(response)) => {
                    for delta in streaming::replay_response(response) {
                        yield Ok(delta);
                    }
                }
                Ok(ChatOutcome::RateLimited) => {
                    yield Ok(StreamDelta::Error {
                        message: "rate limited".to_string(),
                        recoverable: true,
                    });
                }
                Ok(ChatOutcome::ServerError(message)) => {
                    yield Ok(StreamDelta::Error { message, recoverable: true });
                }
                Ok(ChatOutcome::InvalidRequest(message)) => {
                    yield Ok(StreamDelta::Error { message, recoverable: false });
                }
                Err(e) => yield Err(e),
            }
        })
    }

    fn model(&self) -> &str;
    fn provider(&self) -> &'static str;
}
