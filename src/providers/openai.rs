//! `OpenAI` Chat Completions provider.
//!
//! Works against any OpenAI-compatible endpoint (DashScope, vLLM, Ollama,
//! Azure gateways). Authentication headers come from [`LlmSettings`], so
//! gateways that want a raw key in a custom header are covered too.

use crate::config::LlmSettings;
use crate::error::BridgeError;
use crate::llm::{
    ChatOutcome, ChatRequest, ChatResponse, Content, ContentBlock, LlmProvider, Message, Role,
    StopReason, StreamBox, StreamDelta, Usage,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Chat Completions client for one model.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    completions_url: String,
    headers: HeaderMap,
    temperature: f32,
}

impl OpenAIProvider {
    /// Provider for the public API with a bearer key.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the key is not a valid
    /// header value.
    pub fn new(api_key: &str, model: impl Into<String>) -> Result<Self, BridgeError> {
        Self::from_settings(&LlmSettings {
            api_key: Some(api_key.to_string()),
            model: model.into(),
            ..LlmSettings::default()
        })
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if a header is malformed or the
    /// HTTP client cannot be built.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let headers = settings
            .auth_headers()
            .iter()
            .map(|(name, value)| -> Result<(HeaderName, HeaderValue), BridgeError> {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    BridgeError::Configuration(format!("invalid header name {name:?}: {e}"))
                })?;
                let value = HeaderValue::from_str(value).map_err(|e| {
                    BridgeError::Configuration(format!("invalid value for {name}: {e}"))
                })?;
                Ok((name, value))
            })
            .collect::<Result<HeaderMap, BridgeError>>()?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            completions_url: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            headers,
            temperature: settings.temperature,
        })
    }

    fn body(&self, request: ChatRequest, stream: bool) -> CompletionBody<'_> {
        CompletionBody {
            model: &self.model,
            messages: encode_messages(&request.system, &request.messages),
            max_tokens: request.max_tokens,
            temperature: self.temperature,
            tools: request
                .tools
                .map(|tools| tools.into_iter().map(FunctionTool::from).collect()),
            stream,
        }
    }

    async fn post(&self, body: &CompletionBody<'_>) -> Result<reqwest::Response> {
        tracing::debug!(
            model = %self.model,
            stream = body.stream,
            messages = body.messages.len(),
            "Chat completion request"
        );
        self.client
            .post(&self.completions_url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .context("chat completion request failed")
    }
}

/// Maps a non-success status onto the outcome the agent driver expects.
fn failed_outcome(status: StatusCode, body: String) -> ChatOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!("Model provider rate limited the request");
        ChatOutcome::RateLimited
    } else if status.is_server_error() {
        tracing::error!(%status, %body, "Model provider failed");
        ChatOutcome::ServerError(body)
    } else {
        tracing::warn!(%status, %body, "Model provider rejected the request");
        ChatOutcome::InvalidRequest(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let response = self.post(&self.body(request, false)).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read chat completion body")?;

        if !status.is_success() {
            return Ok(failed_outcome(status, body));
        }

        let completion: Completion =
            serde_json::from_str(&body).context("malformed chat completion")?;
        completion.into_response().map(ChatOutcome::Success)
    }

    fn chat_stream(&self, request: ChatRequest) -> StreamBox<'_> {
        Box::pin(async_stream::stream! {
            let response = match self.post(&self.body(request, true)).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let recoverable = !matches!(
                    failed_outcome(status, body.clone()),
                    ChatOutcome::InvalidRequest(_)
                );
                yield Ok(StreamDelta::Error { message: body, recoverable });
                return;
            }

            let mut decoder = ChunkDecoder::default();
            let mut lines = LineBuffer::default();
            let mut bytes = response.bytes_stream();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => lines.extend(&chunk),
                    Err(e) => {
                        yield Err(anyhow::anyhow!("chat completion stream broke: {e}"));
                        return;
                    }
                }
                while let Some(line) = lines.next_line() {
                    for delta in decoder.decode_line(line.trim()) {
                        yield Ok(delta);
                    }
                    if decoder.finished {
                        return;
                    }
                }
            }

            // Some gateways close the connection without sending [DONE].
            let mut tail = decoder.decode_line(lines.rest().trim());
            tail.extend(decoder.finish());
            for delta in tail {
                yield Ok(delta);
            }
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}

/// Splits raw response bytes into lines. Bytes are only decoded once a whole
/// line is buffered, so a character split across network chunks survives.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = memchr::memchr(b'\n', &self.bytes)?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(decode_utf8(&line[..end]))
    }

    /// Whatever followed the last newline.
    fn rest(&mut self) -> String {
        decode_utf8(&std::mem::take(&mut self.bytes))
    }
}

fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(line) => line.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid UTF-8 in completion stream");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Turns the `data:` lines of a Chat Completions event stream into deltas.
///
/// Text is released as it arrives. Tool call fragments are grouped by their
/// `index` and released whole once the stream ends.
#[derive(Debug, Default)]
struct ChunkDecoder {
    calls: BTreeMap<u32, PendingCall>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
    finished: bool,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl ChunkDecoder {
    fn decode_line(&mut self, line: &str) -> Vec<StreamDelta> {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return Vec::new();
        };
        if self.finished {
            return Vec::new();
        }
        if data == "[DONE]" {
            return self.finish();
        }

        let chunk = match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparsable completion chunk");
                return Vec::new();
            }
        };
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let mut text = Vec::new();
        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(reason.into());
            }
            for fragment in choice.delta.tool_calls.into_iter().flatten() {
                self.calls.entry(fragment.index).or_default().absorb(fragment);
            }
            if let Some(delta) = choice.delta.content.filter(|t| !t.is_empty()) {
                text.push(StreamDelta::TextDelta {
                    delta,
                    block_index: 0,
                });
            }
        }
        text
    }

    /// Releases buffered tool calls, usage and the final `Done`. Only the
    /// first call produces anything.
    fn finish(&mut self) -> Vec<StreamDelta> {
        if std::mem::replace(&mut self.finished, true) {
            return Vec::new();
        }

        let calls = std::mem::take(&mut self.calls);
        let fallback_stop = if calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };

        let mut deltas = Vec::with_capacity(calls.len() * 2 + 2);
        // Block 0 carries the text, calls follow in index order.
        for (block_index, (index, call)) in calls.into_iter().enumerate().map(|(i, c)| (i + 1, c)) {
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            deltas.push(StreamDelta::ToolUseStart {
                id: id.clone(),
                name: call.name,
                block_index,
            });
            deltas.push(StreamDelta::ToolInputDelta {
                id,
                delta: call.arguments,
                block_index,
            });
        }
        deltas.extend(self.usage.take().map(StreamDelta::Usage));
        deltas.push(StreamDelta::Done {
            stop_reason: Some(self.stop_reason.take().unwrap_or(fallback_stop)),
        });
        deltas
    }
}

impl PendingCall {
    fn absorb(&mut self, fragment: ToolCallFragment) {
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            self.id = id;
        }
        if let Some(function) = fragment.function {
            self.name.push_str(function.name.as_deref().unwrap_or_default());
            self.arguments
                .push_str(function.arguments.as_deref().unwrap_or_default());
        }
    }
}

/// Flattens the conversation into Chat Completions messages. Tool results
/// become `tool` role messages; text blocks of one message are joined by
/// newlines.
fn encode_messages(system: &str, history: &[Message]) -> Vec<WireMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if !system.is_empty() {
        out.push(WireMessage::text(WireRole::System, system));
    }
    for message in history {
        encode_message(message, &mut out);
    }
    out
}

fn encode_message(message: &Message, out: &mut Vec<WireMessage>) {
    let role = match message.role {
        Role::System => WireRole::System,
        Role::User => WireRole::User,
        Role::Assistant => WireRole::Assistant,
    };
    let blocks = match &message.content {
        Content::Text(text) => {
            out.push(WireMessage::text(role, text));
            return;
        }
        Content::Blocks(blocks) => blocks,
    };

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: part } => text.push(part.as_str()),
            ContentBlock::ToolUse { id, name, input } => calls.push(WireToolCall {
                id: id.clone(),
                kind: FUNCTION,
                function: WireFunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => out.push(WireMessage {
                role: WireRole::Tool,
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_use_id.clone()),
            }),
        }
    }

    let joined = (!text.is_empty()).then(|| text.join("\n"));
    if role == WireRole::Assistant && !calls.is_empty() {
        out.push(WireMessage {
            role,
            content: joined,
            tool_calls: calls,
            tool_call_id: None,
        });
    } else if let Some(joined) = joined {
        out.push(WireMessage::text(role, joined));
    }
}

/// Parses tool call arguments; empty means `{}` and invalid JSON means `null`.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(raw).unwrap_or(Value::Null)
    }
}

const FUNCTION: &str = "function";

// Request wire format

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: WireRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: WireRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum WireRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", skip_deserializing, default = "function_kind")]
    kind: &'static str,
    function: WireFunctionCall,
}

const fn function_kind() -> &'static str {
    FUNCTION
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec,
}

#[derive(Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

impl From<crate::llm::Tool> for FunctionTool {
    fn from(tool: crate::llm::Tool) -> Self {
        Self {
            kind: FUNCTION,
            function: FunctionSpec {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        }
    }
}

// Response wire format

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

impl Completion {
    fn into_response(self) -> Result<ChatResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .context("chat completion carried no choices")?;

        let text = choice
            .message
            .content
            .filter(|text| !text.is_empty())
            .map(|text| ContentBlock::Text { text });
        let calls = choice.message.tool_calls.into_iter().flatten().map(|call| ContentBlock::ToolUse {
            input: parse_arguments(&call.function.arguments),
            id: call.id,
            name: call.function.name,
        });

        Ok(ChatResponse {
            id: self.id,
            content: text.into_iter().chain(calls).collect(),
            model: self.model,
            stop_reason: choice.finish_reason.map(StopReason::from),
            usage: self.usage.map(Usage::from).unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ReplyMessage,
    finish_reason: Option<FinishReason>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

impl From<FinishReason> for StopReason {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::ToolCalls => Self::ToolUse,
            FinishReason::Length => Self::MaxTokens,
            FinishReason::ContentFilter => Self::StopSequence,
            FinishReason::Stop | FinishReason::Other => Self::EndTurn,
        }
    }
}

#[derive(Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<TokenUsage> for Usage {
    fn from(usage: TokenUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<FinishReason>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeyFormat;
    use crate::llm::ResponseBuilder;
    use serde_json::json;

    fn request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            system: String::new(),
            messages,
            tools: None,
            max_tokens: 512,
        }
    }

    fn decode_all(lines: &[&str]) -> Vec<StreamDelta> {
        let mut decoder = ChunkDecoder::default();
        let mut deltas: Vec<StreamDelta> =
            lines.iter().flat_map(|l| decoder.decode_line(l)).collect();
        deltas.extend(decoder.finish());
        deltas
    }

    fn done_count(deltas: &[StreamDelta]) -> usize {
        deltas
            .iter()
            .filter(|d| matches!(d, StreamDelta::Done { .. }))
            .count()
    }

    #[test]
    fn test_settings_drive_url_and_headers() -> anyhow::Result<()> {
        let provider = OpenAIProvider::from_settings(&LlmSettings {
            api_key: Some("sk-raw".to_string()),
            api_key_header: "X-Api-Key".to_string(),
            api_key_format: ApiKeyFormat::Raw,
            custom_headers: vec![("X-Tenant".to_string(), "feeds".to_string())],
            base_url: "https://gateway.local/v1/".to_string(),
            model: "qwen-plus".to_string(),
            ..LlmSettings::default()
        })?;

        assert_eq!(provider.model(), "qwen-plus");
        assert_eq!(provider.completions_url, "https://gateway.local/v1/chat/completions");
        assert_eq!(provider.headers["x-api-key"], "sk-raw");
        assert_eq!(provider.headers["x-tenant"], "feeds");
        assert!(!provider.headers.contains_key("authorization"));
        Ok(())
    }

    #[test]
    fn test_new_sends_bearer_key() -> anyhow::Result<()> {
        let provider = OpenAIProvider::new("sk-test", "gpt-4o-mini")?;
        assert_eq!(provider.headers["authorization"], "Bearer sk-test");
        assert_eq!(provider.provider(), "openai");
        Ok(())
    }

    #[test]
    fn test_bad_custom_header_is_configuration_error() {
        let result = OpenAIProvider::from_settings(&LlmSettings {
            api_key: Some("sk-test".to_string()),
            custom_headers: vec![("bad header".to_string(), "x".to_string())],
            ..LlmSettings::default()
        });
        assert!(matches!(result, Err(BridgeError::Configuration(_))));
    }

    #[test]
    fn test_body_includes_stream_flag_and_tools_only_when_set() -> anyhow::Result<()> {
        let provider = OpenAIProvider::new("sk-test", "gpt-4o-mini")?;

        let plain = serde_json::to_value(provider.body(request(vec![Message::user("hi")]), false))?;
        assert_eq!(plain["model"], "gpt-4o-mini");
        assert_eq!(plain["max_tokens"], 512);
        assert!(plain.get("stream").is_none());
        assert!(plain.get("tools").is_none());

        let mut with_tools = request(vec![Message::user("hi")]);
        with_tools.tools = Some(vec![crate::llm::Tool {
            name: "search_feeds".to_string(),
            description: "Search feeds".to_string(),
            input_schema: json!({"type": "object"}),
        }]);
        let streaming = serde_json::to_value(provider.body(with_tools, true))?;
        assert_eq!(streaming["stream"], true);
        assert_eq!(
            streaming["tools"],
            json!([{
                "type": "function",
                "function": {
                    "name": "search_feeds",
                    "description": "Search feeds",
                    "parameters": {"type": "object"}
                }
            }])
        );
        Ok(())
    }

    #[test]
    fn test_system_prompt_goes_first() {
        let encoded = encode_messages(
            "You are helpful.",
            &[Message::system("Be brief."), Message::user("Hello"), Message::assistant("Hi!")],
        );
        let roles: Vec<WireRole> = encoded.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [WireRole::System, WireRole::System, WireRole::User, WireRole::Assistant]
        );
        assert_eq!(encoded[0].content.as_deref(), Some("You are helpful."));
    }

    #[test]
    fn test_tool_exchange_encoding() -> anyhow::Result<()> {
        let encoded = encode_messages(
            "",
            &[
                Message::user("find cats"),
                Message::assistant_with_tool_use(
                    Some(r#"{"keyword":"cats"}"#.to_string()),
                    "fallback_1",
                    "search_feeds",
                    json!({"keyword": "cats"}),
                ),
                Message::tool_result("fallback_1", "3 results", false),
            ],
        );

        assert_eq!(
            serde_json::to_value(&encoded)?,
            json!([
                {"role": "user", "content": "find cats"},
                {
                    "role": "assistant",
                    "content": r#"{"keyword":"cats"}"#,
                    "tool_calls": [{
                        "id": "fallback_1",
                        "type": "function",
                        "function": {"name": "search_feeds", "arguments": r#"{"keyword":"cats"}"#}
                    }]
                },
                {"role": "tool", "content": "3 results", "tool_call_id": "fallback_1"}
            ])
        );
        Ok(())
    }

    #[test]
    fn test_completion_with_tool_call() -> anyhow::Result<()> {
        let completion: Completion = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_feed_detail", "arguments": "{\"feed_id\":\"f1\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))?;

        let response = completion.into_response()?;
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(
            response.content,
            [ContentBlock::ToolUse {
                id: "call_abc".to_string(),
                name: "get_feed_detail".to_string(),
                input: json!({"feed_id": "f1"}),
            }]
        );
        Ok(())
    }

    #[test]
    fn test_completion_without_choices_fails() -> anyhow::Result<()> {
        let completion: Completion = serde_json::from_value(json!({"choices": []}))?;
        assert!(completion.into_response().is_err());
        Ok(())
    }

    #[test]
    fn test_failed_statuses() {
        assert!(matches!(
            failed_outcome(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ChatOutcome::RateLimited
        ));
        assert!(matches!(
            failed_outcome(StatusCode::BAD_GATEWAY, "upstream".to_string()),
            ChatOutcome::ServerError(body) if body == "upstream"
        ));
        assert!(matches!(
            failed_outcome(StatusCode::UNAUTHORIZED, "bad key".to_string()),
            ChatOutcome::InvalidRequest(body) if body == "bad key"
        ));
    }

    #[test]
    fn test_unknown_finish_reason_is_end_turn() -> anyhow::Result<()> {
        let reason: FinishReason = serde_json::from_str("\"insufficient_system_resource\"")?;
        assert_eq!(StopReason::from(reason), StopReason::EndTurn);
        Ok(())
    }

    #[test]
    fn test_stream_text_then_single_done() {
        let deltas = decode_all(&[
            r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);

        let texts: Vec<&str> = deltas
            .iter()
            .filter_map(|d| match d {
                StreamDelta::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["Hel", "lo"]);
        assert!(matches!(
            deltas.last(),
            Some(StreamDelta::Done {
                stop_reason: Some(StopReason::EndTurn)
            })
        ));
        assert_eq!(done_count(&deltas), 1);
    }

    #[test]
    fn test_stream_tool_call_fragments_are_assembled() {
        let deltas = decode_all(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"search_feeds","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"keyword\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"cats\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
            "data: [DONE]",
        ]);

        let mut builder = ResponseBuilder::new();
        for delta in &deltas {
            builder.push(delta);
        }
        let response = builder.finish("gpt-4o-mini");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 7);
        assert_eq!(
            response.content,
            [ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "search_feeds".to_string(),
                input: json!({"keyword": "cats"}),
            }]
        );
    }

    #[test]
    fn test_stream_without_done_marker_finishes_once() {
        let mut decoder = ChunkDecoder::default();
        let mut deltas = decoder.decode_line(r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#);
        deltas.extend(decoder.finish());
        deltas.extend(decoder.finish());
        deltas.extend(decoder.decode_line("data: [DONE]"));

        assert!(decoder.finished);
        assert_eq!(done_count(&deltas), 1);
    }

    #[test]
    fn test_characters_split_across_chunks_are_kept_whole() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"猫猫\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b >= 0x80).map_or(0, |i| i + 1);

        let mut lines = LineBuffer::default();
        lines.extend(&line[..split]);
        assert_eq!(lines.next_line(), None);
        lines.extend(&line[split..]);
        lines.extend(b"data: [DO");

        let mut decoder = ChunkDecoder::default();
        let mut deltas = Vec::new();
        while let Some(line) = lines.next_line() {
            deltas.extend(decoder.decode_line(line.trim()));
        }
        assert_eq!(lines.rest(), "data: [DO");
        assert!(matches!(
            &deltas[..],
            [StreamDelta::TextDelta { delta, .. }] if delta == "猫猫"
        ));
    }

    #[test]
    fn test_stream_ignores_comments_and_garbage() {
        let deltas = decode_all(&[": keep-alive", "event: message", "data: {oops", "data: [DONE]"]);
        assert_eq!(deltas.len(), 1);
        assert_eq!(done_count(&deltas), 1);
    }
}
