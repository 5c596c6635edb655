use crate::middleware::{admit, client_id, ApiError};
use crate::validation::validate_query_request;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cadence_core::CadenceError;
use cadence_orchestrator::{Orchestrator, QueryRequest, QueryResult, TaskStatusReport};
use cadence_security::RateLimiter;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Rate-limit scope for synchronous submissions.
pub const QUERY_SCOPE: &str = "query";
/// Rate-limit scope for streaming submissions.
pub const STREAM_SCOPE: &str = "stream";
/// Rate-limit scope for read-only status lookups.
pub const STATUS_SCOPE: &str = "status";

/// Shared application state.
pub struct AppState {
    /// Query processing.
    pub orchestrator: Arc<Orchestrator>,
    /// Admission control for every route.
    pub limiter: Arc<RateLimiter>,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the HTTP and WebSocket routes over `orchestrator`.
    pub fn build(orchestrator: Arc<Orchestrator>, limiter: Arc<RateLimiter>) -> Router {
        let state = Arc::new(AppState {
            orchestrator,
            limiter,
        });

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/v1/tasks", post(submit_task))
            .route("/api/v1/tasks/{id}", get(task_status))
            .route("/api/v1/agents/performance", get(agent_performance))
            .route("/api/v1/ws", get(ws_handler))
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "cadence"}))
}

async fn submit_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, ApiError> {
    let client = client_id(&headers)?;
    let Json(request) = payload.map_err(|rejection| {
        CadenceError::Validation(format!("invalid request body: {}", rejection.body_text()))
    })?;
    validate_query_request(&request)?;
    admit(
        &state.limiter,
        QUERY_SCOPE,
        &client,
        request.session_id.as_deref(),
    )
    .await?;

    let result = state.orchestrator.process_query(request).await?;
    info!(
        client_id = %client,
        task_id = %result.task_id,
        status = %result.status,
        "Task processed"
    );
    Ok(Json(result))
}

async fn task_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusReport>, ApiError> {
    let client = client_id(&headers)?;
    admit(&state.limiter, STATUS_SCOPE, &client, None).await?;
    let task_id = Uuid::parse_str(&id)
        .map_err(|_| CadenceError::Validation(format!("invalid task id: {id}")))?;
    Ok(Json(state.orchestrator.get_task_status(task_id).await?))
}

async fn agent_performance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = client_id(&headers)?;
    admit(&state.limiter, STATUS_SCOPE, &client, None).await?;
    let stats = state.orchestrator.router().get_performance_stats();
    Ok(Json(json!({ "agents": stats })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_id(&headers)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, client)))
}

/// Each inbound text frame is one submission; its events are streamed back
/// as JSON text frames before the next frame is read.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client: String) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!(connection_id = %connection_id, client_id = %client, "WebSocket connected");

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let mut frames = match admit_stream(&state, &client, text.as_str()).await {
            Ok(request) => state.orchestrator.process_query_stream(request),
            Err(e) => {
                let mut body = e.body();
                body["type"] = json!("error");
                if ws_sender
                    .send(Message::Text(body.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let mut delivered = true;
        while let Some(event) = frames.next().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Failed to serialise event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                delivered = false;
                break;
            }
        }
        if !delivered {
            break;
        }
    }

    info!(connection_id = %connection_id, "WebSocket disconnected");
}

async fn admit_stream(
    state: &AppState,
    client: &str,
    text: &str,
) -> Result<QueryRequest, ApiError> {
    let request: QueryRequest = serde_json::from_str(text)
        .map_err(|e| CadenceError::Validation(format!("invalid request frame: {e}")))?;
    validate_query_request(&request)?;
    admit(
        &state.limiter,
        STREAM_SCOPE,
        client,
        request.session_id.as_deref(),
    )
    .await?;
    Ok(request)
}
