use super::protocol::{JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::transport::{McpTransport, TransportReply};
use crate::error::BridgeError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Option<Value>,
}

/// In-memory MCP server: answers from a script and records every message.
pub struct ScriptedTransport {
    session_id: Option<String>,
    tools: Vec<Value>,
    results: HashMap<String, Value>,
    errors: HashMap<String, (i32, String)>,
    init_failures: AtomicUsize,
    list_fails: bool,
    healthy: bool,
    call_delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            session_id: None,
            tools: Vec::new(),
            results: HashMap::new(),
            errors: HashMap::new(),
            init_failures: AtomicUsize::new(0),
            list_fails: false,
            healthy: true,
            call_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_session_id(mut self, id: &str) -> Self {
        self.session_id = Some(id.to_string());
        self
    }

    /// Advertise tools with a single required string `keyword` parameter.
    pub fn with_tools(mut self, names: &[&str]) -> Self {
        self.tools.extend(names.iter().map(|name| {
            json!({
                "name": name,
                "description": format!("{name} tool"),
                "inputSchema": {
                    "type": "object",
                    "properties": {"keyword": {"type": "string"}},
                }
            })
        }));
        self
    }

    pub fn with_tool_definition(mut self, definition: Value) -> Self {
        self.tools.push(definition);
        self
    }

    /// Script the `result` returned by `tools/call` for one tool.
    pub fn with_tool_result(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    /// Answer `method` with a JSON-RPC error object.
    pub fn with_error(mut self, method: &str, code: i32, message: &str) -> Self {
        self.errors
            .insert(method.to_string(), (code, message.to_string()));
        self
    }

    pub fn failing_initialize(self, times: usize) -> Self {
        self.init_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.list_fails = true;
        self
    }

    /// Hold every `tools/call` for `delay` before answering.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    /// Arguments of every `tools/call` for `tool`, in order.
    pub fn tool_calls(&self, tool: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "tools/call")
            .filter_map(|c| c.params)
            .filter(|p| p["name"] == tool)
            .map(|p| p["arguments"].clone())
            .collect()
    }

    fn record(&self, request: &JsonRpcRequest, session_id: Option<&str>) {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push(RecordedCall {
                method: request.method.clone(),
                session_id: session_id.map(ToOwned::to_owned),
                params: request.params.clone(),
            });
    }

    fn respond(&self, request: &JsonRpcRequest) -> Result<Value, BridgeError> {
        match request.method.as_str() {
            "initialize" => {
                let remaining = self.init_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.init_failures.store(remaining - 1, Ordering::SeqCst);
                    return Err(BridgeError::Connectivity("connection refused".to_string()));
                }
                Ok(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "1.0"}
                }))
            }
            "tools/list" if self.list_fails => {
                Err(BridgeError::Connectivity("connection reset".to_string()))
            }
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p["name"].as_str())
                    .unwrap_or_default();
                Ok(self.results.get(name).cloned().unwrap_or_else(|| {
                    json!({"content": [{"type": "text", "text": format!("{name} ok")}]})
                }))
            }
            _ => Ok(json!({})),
        }
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn send(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<TransportReply, BridgeError> {
        self.record(&request, session_id);
        if let (Some(delay), "tools/call") = (self.call_delay, request.method.as_str()) {
            tokio::time::sleep(delay).await;
        }

        let response = if let Some((code, message)) = self.errors.get(&request.method) {
            JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: None,
                error: Some(JsonRpcError {
                    code: *code,
                    message: message.clone(),
                    data: None,
                }),
                id: request.id.clone(),
            }
        } else {
            JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: Some(self.respond(&request)?),
                error: None,
                id: request.id.clone(),
            }
        };

        let session_id = if request.method == "initialize" {
            self.session_id.clone()
        } else {
            None
        };
        Ok(TransportReply {
            response,
            session_id,
        })
    }

    async fn notify(
        &self,
        notification: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<(), BridgeError> {
        self.record(&notification, session_id);
        Ok(())
    }

    async fn health(&self) -> bool {
        self.healthy
    }
}
