//! HTTP API exposing the session lifecycle
//!
//! Endpoints mirror the session operations: initialize, chat, execute,
//! layer (execute and classify), history and close. Error kinds map onto
//! status codes in [`ApiError`]; SQL execution failures are ordinary `200`
//! responses with `success: false`.

use crate::config::{Config, DatabaseConfig, PipelineConfig};
use crate::error::{self, Result, SpatialMindError};
use crate::image::ImageAttachment;
use crate::pipeline::Turn;
use crate::session::{SessionInfo, SessionRegistry, SessionRequest, SessionResponse};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    registry: Arc<SessionRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub session_id: String,
    pub database_config: DatabaseConfig,
    /// Pipeline tag such as `gemini_vision` or `ollama_text`
    pub chatbot_type: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    /// Base64 image, with or without a data-URL prefix
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_mime_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub rephrased_question: String,
    pub sql: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub session_id: String,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryExecutionResponse {
    pub session_id: String,
    pub success: bool,
    pub rows: Vec<Vec<Option<String>>>,
    pub column_names: Vec<String>,
    pub row_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    session_id: String,
    turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    session_ids: Vec<String>,
    sessions: Vec<SessionInfo>,
}

/// Error wrapper mapping the error taxonomy onto HTTP status codes
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match error::classify(&self.0) {
            Some(SpatialMindError::SessionExists(_)) => StatusCode::CONFLICT,
            Some(SpatialMindError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Some(SpatialMindError::Config(_))
            | Some(SpatialMindError::InvalidRequest(_))
            | Some(SpatialMindError::Image(_))
            | Some(SpatialMindError::Serialization(_)) => StatusCode::BAD_REQUEST,
            Some(SpatialMindError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(SpatialMindError::Provider(_))
            | Some(SpatialMindError::Http(_))
            | Some(SpatialMindError::Database(_)) => StatusCode::BAD_GATEWAY,
            Some(SpatialMindError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Some(SpatialMindError::Io(_)) | Some(SpatialMindError::Yaml(_)) | None => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "Request failed: {:#}", self.0);
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {:#}", self.0);
        }
        let body = Json(json!({
            "status": "error",
            "detail": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router
pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/initialize", post(initialize))
        .route("/chat", post(chat))
        .route("/execute", post(execute))
        .route("/layer", post(layer))
        .route("/session/:id", delete(close_session))
        .route(
            "/session/:id/history",
            get(get_history).delete(clear_history),
        )
        .with_state(AppState { registry })
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "spatialmind",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "initialize": "POST /initialize",
            "chat": "POST /chat",
            "execute": "POST /execute",
            "layer": "POST /layer",
            "sessions": "GET /sessions",
            "history": "GET|DELETE /session/{id}/history",
            "close": "DELETE /session/{id}",
            "health": "GET /health",
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_sessions": state.registry.active_count().await,
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        session_ids: state.registry.list_sessions().await,
        sessions: state.registry.sessions_info().await,
    })
}

async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<InitializeRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let pipeline: PipelineConfig = request
        .chatbot_type
        .parse()
        .map_err(anyhow::Error::from)?;
    let pipeline = pipeline.with_model(request.model);
    let tag = pipeline.tag();

    state
        .registry
        .initialize(&request.session_id, request.database_config, pipeline)
        .await?;

    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!(
            "Session {} initialized with {}",
            request.session_id, tag
        ),
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let image = match request.image.as_deref().filter(|i| !i.trim().is_empty()) {
        Some(data) => Some(ImageAttachment::from_base64(
            data,
            request.image_mime_type.as_deref(),
        )?),
        None => None,
    };

    let outcome = state
        .registry
        .ask(&request.session_id, &request.message, image)
        .await?;

    Ok(Json(ChatResponse {
        session_id: request.session_id,
        response: outcome.answer,
        rephrased_question: outcome.rephrased_question,
        sql: outcome.sql.map(|q| q.sql),
    }))
}

async fn execute(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryExecutionResponse>> {
    let result = state
        .registry
        .execute(&request.session_id, &request.query)
        .await?;

    Ok(Json(QueryExecutionResponse {
        session_id: request.session_id,
        success: result.success,
        row_count: result.row_count(),
        rows: result.rows,
        column_names: result.columns,
        error: result.error,
    }))
}

async fn layer(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<Value>> {
    let response = state
        .registry
        .dispatch(
            &request.session_id,
            SessionRequest::Layer {
                sql: request.query,
            },
        )
        .await?;

    let SessionResponse::Layer { result, layer } = response else {
        return Err(anyhow::anyhow!("unexpected response to layer request").into());
    };

    let mut body = if result.success {
        layer.to_json()
    } else {
        json!({ "kind": "failed", "error": result.error })
    };
    if let Value::Object(map) = &mut body {
        map.insert("session_id".to_string(), json!(request.session_id));
        map.insert("success".to_string(), json!(result.success));
    }
    Ok(Json(body))
}

async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let turns = state.registry.history(&session_id).await?;
    Ok(Json(HistoryResponse { session_id, turns }))
}

async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state.registry.clear_history(&session_id).await?;
    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!("History cleared for session {}", session_id),
    }))
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    state.registry.close(&session_id).await?;
    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!("Session {} closed", session_id),
    }))
}

/// Run the API until Ctrl-C or SIGTERM, then close every session
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(config: &Config, registry: Arc<SessionRegistry>) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SpatialMindError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("SpatialMind API listening on http://{}", addr);

    let app = router(Arc::clone(&registry));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    registry.shutdown().await;
    tracing::info!("Server stopped");
    result.map_err(|e| SpatialMindError::Io(e).into())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
