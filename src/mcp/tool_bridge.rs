//! Bridge MCP tool descriptors to the [`Tool`] capability.

use crate::tools::{ParameterSchema, Tool, ToolRegistry, ToolSpec};
use crate::types::{ToolResult, char_prefix};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::client::McpClient;
use super::protocol::McpToolDefinition;

/// Maximum characters of text extracted from one tool result.
pub const MAX_TOOL_RESULT_CHARS: usize = 50_000;

/// A remote MCP tool callable through the session client.
///
/// # Example
///
/// ```ignore
/// use agent_bridge::mcp::{McpClient, McpToolHandle};
///
/// let client = Arc::new(McpClient::new(transport));
/// for definition in client.list_tools().await {
///     registry.register(McpToolHandle::new(Arc::clone(&client), definition))?;
/// }
/// ```
pub struct McpToolHandle {
    client: Arc<McpClient>,
    spec: ToolSpec,
}

impl McpToolHandle {
    #[must_use]
    pub fn new(client: Arc<McpClient>, definition: McpToolDefinition) -> Self {
        let parameters = ParameterSchema::from_json_schema(&definition.input_schema);
        Self {
            client,
            spec: ToolSpec::new(
                definition.name,
                definition.description.as_deref(),
                parameters,
            ),
        }
    }
}

#[async_trait]
impl Tool for McpToolHandle {
    fn describe(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, arguments: Value) -> anyhow::Result<ToolResult> {
        let arguments = match self.spec.parameters.bind(arguments) {
            Ok(arguments) => arguments,
            Err(message) => {
                log::warn!("Rejected arguments for {}: {message}", self.spec.name);
                return Ok(ToolResult::error(format!("Invalid arguments: {message}")));
            }
        };

        let started = Instant::now();
        let result = self.client.call_tool(&self.spec.name, arguments).await?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let output = extract_text_content(&result, MAX_TOOL_RESULT_CHARS);
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        log::info!(
            "MCP tool {} finished in {elapsed}ms ({} chars, error={is_error})",
            self.spec.name,
            output.chars().count()
        );

        let tool_result = if is_error {
            ToolResult::error(output)
        } else {
            ToolResult::success_with_data(output, result)
        };
        Ok(tool_result.with_duration(elapsed))
    }
}

/// Convert tool descriptors into a registry of handles.
///
/// A descriptor that cannot be registered (empty or duplicate name) is
/// logged and skipped. An empty result is logged as a warning.
pub fn convert_tools(definitions: Vec<McpToolDefinition>, client: &Arc<McpClient>) -> ToolRegistry {
    let total = definitions.len();
    let mut registry = ToolRegistry::new();

    for definition in definitions {
        let name = definition.name.clone();
        if let Err(e) = registry.register(McpToolHandle::new(Arc::clone(client), definition)) {
            log::error!("Skipping MCP tool {name:?}: {e}");
        }
    }

    if registry.is_empty() {
        log::warn!("No MCP tools converted ({total} descriptors)");
    } else {
        log::info!("Converted {}/{total} MCP tools", registry.len());
    }
    registry
}

/// Extract readable text from a `tools/call` result.
///
/// Text items of a `content` list are concatenated; once the text exceeds
/// `max_chars` it is cut and a marker with the original length is appended.
/// Results without text are serialized as JSON, capped the same way.
#[must_use]
pub fn extract_text_content(result: &Value, max_chars: usize) -> String {
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let mut text = String::new();
        for item in items {
            match item {
                Value::String(s) => text.push_str(s),
                Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                    text.push_str(obj.get("text").and_then(Value::as_str).unwrap_or_default());
                }
                _ => {}
            }

            if let Some(prefix) = char_prefix(&text, max_chars) {
                let original = text.chars().count();
                log::warn!("MCP tool result too large ({original} chars), truncating to {max_chars}");
                return format!(
                    "{prefix}\n\n... (content truncated, original length: {original} characters)"
                );
            }
        }
        if !text.is_empty() {
            return text;
        }
    }

    let json = result.to_string();
    match char_prefix(&json, max_chars) {
        Some(prefix) => {
            let original = json.chars().count();
            log::warn!("MCP JSON result too large ({original} chars), truncating to {max_chars}");
            format!("{prefix}\n\n... (JSON truncated, original length: {original} characters)")
        }
        None => json,
    }
}
