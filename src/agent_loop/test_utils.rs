use crate::error::BridgeError;
use crate::events::AgentEvent;
use crate::llm::{
    ChatOutcome, ChatRequest, ChatResponse, ContentBlock, LlmProvider, StopReason, Usage,
};
use crate::providers::ProviderFactory;
use crate::tools::{ParameterSchema, Tool, ToolSpec};
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Replays scripted outcomes in order, then answers `"Done"` forever.
pub struct MockProvider {
    script: Mutex<VecDeque<ChatOutcome>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn new(script: Vec<ChatOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("lock poisoned").len()
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    pub fn text_response(text: &str) -> ChatOutcome {
        scripted(
            ContentBlock::Text {
                text: text.to_string(),
            },
            StopReason::EndTurn,
        )
    }

    pub fn tool_use_response(call_id: &str, tool: &str, input: Value) -> ChatOutcome {
        scripted(
            ContentBlock::ToolUse {
                id: call_id.to_string(),
                name: tool.to_string(),
                input,
            },
            StopReason::ToolUse,
        )
    }
}

fn scripted(block: ContentBlock, stop_reason: StopReason) -> ChatOutcome {
    ChatOutcome::Success(ChatResponse {
        id: "resp_mock".to_string(),
        content: vec![block],
        model: "mock-model".to_string(),
        stop_reason: Some(stop_reason),
        usage: Usage {
            input_tokens: 12,
            output_tokens: 8,
        },
    })
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        self.requests.lock().expect("lock poisoned").push(request);
        let next = self.script.lock().expect("lock poisoned").pop_front();
        Ok(next.unwrap_or_else(|| Self::text_response("Done")))
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

/// Hands out one shared [`MockProvider`] and counts how often it was asked.
pub struct MockProviderFactory {
    provider: Arc<MockProvider>,
    creates: AtomicUsize,
}

impl MockProviderFactory {
    pub fn new(provider: Arc<MockProvider>) -> Self {
        Self {
            provider,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self) -> Result<Arc<dyn LlmProvider>, BridgeError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.provider) as Arc<dyn LlmProvider>)
    }
}

/// Records every argument object it is invoked with.
pub struct RecordingTool {
    spec: ToolSpec,
    reply: std::result::Result<String, String>,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl RecordingTool {
    pub fn new(name: &str) -> Self {
        Self {
            spec: ToolSpec::new(
                name,
                None,
                ParameterSchema::from_json_schema(&json!({
                    "type": "object",
                    "properties": {
                        "keyword": {"type": "string"},
                        "feed_id": {"type": "string"}
                    }
                })),
            ),
            reply: Ok(format!("{name} ok")),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every invocation fail with `message`.
    pub fn failing(name: &str, message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            ..Self::new(name)
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn describe(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: Value) -> Result<ToolResult> {
        self.calls.lock().expect("lock poisoned").push(arguments);
        match &self.reply {
            Ok(output) => Ok(ToolResult::success(output.clone())),
            Err(message) => Err(anyhow::anyhow!("{message}")),
        }
    }
}

pub async fn drain_events(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
