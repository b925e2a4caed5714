//! Axum route handlers for an A2A agent service.
//!
//! # Routes
//!
//! - `POST /`                       - JSON-RPC envelope, dispatched to the task manager
//! - `GET  /.well-known/agent.json` - Returns the service's `AgentCard`
//! - `GET  /health`                 - Returns `{"status": "ok", "service": ..., "version": ...}`

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::a2a::errors::{A2AErrorCode, RpcError, ValidationError};
use crate::a2a::task_manager::{parse_request, RpcCall, TaskManager};
use crate::a2a::types::{AgentCard, JsonRpcResponse, AGENT_CARD_PATH};

type HandlerError = (StatusCode, Json<Value>);

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Card served on the discovery path.
    pub agent_card: Arc<AgentCard>,
    /// Handles validated JSON-RPC calls.
    pub task_manager: Arc<dyn TaskManager>,
}

impl AppState {
    pub fn new(agent_card: AgentCard, task_manager: Arc<dyn TaskManager>) -> Self {
        Self {
            agent_card: Arc::new(agent_card),
            task_manager,
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route(AGENT_CARD_PATH, get(agent_card_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.agent_card.name,
        "version": crate::VERSION,
    }))
}

/// GET /.well-known/agent.json - discovery.
async fn agent_card_handler(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.agent_card.as_ref().clone())
}

/// POST / - JSON-RPC entry point.
///
/// Malformed input is answered with HTTP 400 and an RPC error carrying
/// field detail. Every well-formed call gets HTTP 200, including a task
/// that ended FAILED and a `tasks/get` for an unknown id.
async fn rpc_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, HandlerError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| rejection(Value::Null, ValidationError::Parse(e.to_string())))?;
    let rpc_id = body.get("id").cloned().unwrap_or(Value::Null);

    let call = parse_request(&body).map_err(|e| rejection(rpc_id.clone(), e))?;
    match call {
        RpcCall::Send(request) => {
            log::debug!("tasks/send for task {}", request.params.id);
            envelope(&state.task_manager.on_send_task(request).await, rpc_id)
        }
        RpcCall::Get(request) => {
            log::debug!("tasks/get for task {}", request.params.id);
            envelope(&state.task_manager.on_get_task(request).await, rpc_id)
        }
    }
}

fn rejection(rpc_id: Value, error: ValidationError) -> HandlerError {
    log::warn!("Rejected request: {}", error);
    let response = JsonRpcResponse::<Value>::failure(rpc_id, error.to_rpc_error());
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::to_value(response).unwrap_or(Value::Null)),
    )
}

fn envelope<T: Serialize>(response: &T, rpc_id: Value) -> Result<Json<Value>, HandlerError> {
    serde_json::to_value(response).map(Json).map_err(|e| {
        log::error!("Cannot serialize response: {}", e);
        let error = RpcError::new(A2AErrorCode::InternalError, e.to_string());
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(
                serde_json::to_value(JsonRpcResponse::<Value>::failure(rpc_id, error))
                    .unwrap_or(Value::Null),
            ),
        )
    })
}
