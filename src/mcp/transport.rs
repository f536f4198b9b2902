//! MCP transport implementations.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, error_codes};
use crate::config::McpSettings;
use crate::error::BridgeError;

/// Header carrying the session id. Lookup is case-insensitive.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A response together with the session id the server attached to it, if any.
#[derive(Clone, Debug)]
pub struct TransportReply {
    pub response: JsonRpcResponse,
    pub session_id: Option<String>,
}

/// Trait for MCP transports.
///
/// Transports move JSON-RPC messages and session headers; they do not track
/// session state. That belongs to [`super::McpClient`].
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response. The transport assigns the
    /// request id.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connectivity`] if the service cannot be reached
    /// or answers with an HTTP failure, and [`BridgeError::RemoteProtocol`]
    /// if the body is not a JSON-RPC response.
    async fn send(
        &self,
        request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<TransportReply, BridgeError>;

    /// Send a one-way notification.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connectivity`] on transport failure.
    async fn notify(
        &self,
        notification: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<(), BridgeError>;

    /// Lightweight liveness probe. Never fails; unreachable means `false`.
    async fn health(&self) -> bool;
}

/// Streamable-HTTP transport: every message is one POST to the endpoint.
///
/// The underlying `reqwest::Client` keeps its connection pool for the life of
/// the transport, so sessions can be reset without new TCP handshakes.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    health_url: String,
    settings: McpSettings,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`BridgeError::Configuration`] if the HTTP client cannot be built.
    pub fn new(settings: McpSettings) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint(),
            health_url: settings.health_url(),
            settings,
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn post(&self, body: &JsonRpcRequest, session_id: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        match session_id {
            Some(id) => builder.header(SESSION_HEADER, id),
            None => builder,
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(
        &self,
        mut request: JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<TransportReply, BridgeError> {
        request.id = Some(RequestId::Number(self.next_request_id()));

        log::debug!("MCP request method={} id={:?}", request.method, request.id);

        let response = self
            .post(&request, session_id)
            .send()
            .await
            .map_err(|e| connectivity(&request.method, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Connectivity(format!(
                "{} returned HTTP {status}: {body}",
                request.method
            )));
        }

        let session_id = session_id_from(response.headers());
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| connectivity(&request.method, &e))?;

        let response = if is_sse {
            parse_sse_response(&body, request.id.as_ref())?
        } else {
            parse_json_response(&body)?
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
        let response = self
            .post(&notification, session_id)
            .send()
            .await
            .map_err(|e| connectivity(&notification.method, &e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BridgeError::Connectivity(format!(
                "{} returned HTTP {status}",
                notification.method
            )))
        }
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(&self.health_url)
            .timeout(self.settings.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                log::debug!("MCP health probe failed: {e}");
                false
            }
        }
    }
}

fn connectivity(method: &str, err: &reqwest::Error) -> BridgeError {
    let kind = if err.is_timeout() { "timed out" } else { "failed" };
    BridgeError::Connectivity(format!("{method} {kind}: {err}"))
}

/// Reads the session header. `HeaderMap` lookups are case-insensitive.
pub(crate) fn session_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_json_response(body: &str) -> Result<JsonRpcResponse, BridgeError> {
    serde_json::from_str(body).map_err(|e| {
        BridgeError::remote(
            error_codes::PARSE_ERROR,
            format!("invalid JSON-RPC response: {e}"),
        )
    })
}

/// Picks the response matching `id` out of an SSE body. Servers speaking
/// streamable HTTP may answer a POST with a short event stream.
fn parse_sse_response(
    body: &str,
    id: Option<&RequestId>,
) -> Result<JsonRpcResponse, BridgeError> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .find(|response| id.is_none() || response.id.as_ref() == id)
        .ok_or_else(|| {
            BridgeError::remote(
                error_codes::PARSE_ERROR,
                "event stream carried no matching JSON-RPC response",
            )
        })
}
