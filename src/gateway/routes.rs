//! HTTP routes.

use super::{Gateway, WsConnection};
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Prefix of the agent endpoints.
pub const API_PREFIX: &str = "/api/agent";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: &'static str,
    /// `ok` or `unavailable`
    pub mcp_service: &'static str,
}

/// Build the application router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let api = Router::new()
        .route("/chat", get(chat))
        .route("/tools", get(tools))
        .route("/health", get(health));

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn chat(ws: WebSocketUpgrade, State(gateway): State<Arc<Gateway>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        gateway.serve_connection(WsConnection::new(socket)).await;
    })
}

async fn tools(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(json!({ "tools": gateway.list_tools().await }))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    let healthy = gateway.mcp_healthy().await;
    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        mcp_service: if healthy { "ok" } else { "unavailable" },
    })
}
