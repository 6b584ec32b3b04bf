// SPDX-License-Identifier: MIT

//! HTTP API over the engine
//!
//! Thin handlers: every route resolves to one `Engine` or catalog call and
//! maps `FlowError` onto a status code with an `{error}` body.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::flow::engine::{Engine, Execution};
use crate::flow::workflow::types::WorkflowDefinition;
use crate::sdk::{ExecutionEvent, FlowError, StoreError};

mod mcp;

/// Buffered events per SSE client
const SSE_BUFFER: usize = 100;

type AppState = Arc<Engine>;

/// `FlowError` rendered as an HTTP response
pub struct ApiError(FlowError);

impl<E: Into<FlowError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FlowError::WorkflowNotFound(_)
            | FlowError::ExecutionNotFound(_)
            | FlowError::McpServerNotFound(_) => StatusCode::NOT_FOUND,
            FlowError::Validation(_) | FlowError::Cycle(_) | FlowError::Planning(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            FlowError::Json(_) | FlowError::Yaml(_) => StatusCode::BAD_REQUEST,
            FlowError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            // Node errors only reach handlers from MCP servers that failed to answer
            FlowError::Node(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "error": self.0.to_string() });
        match &self.0 {
            FlowError::Validation(err) => body["issues"] = json!(err.issues),
            FlowError::Cycle(err) => body["cycle"] = json!(err.cycle),
            _ => {}
        }
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(engine: Arc<Engine>) -> Router {
    let workflows = Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/import", post(import_workflow))
        .route("/node-types", get(list_node_types))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/stop", post(stop_execution))
        .route("/executions/{id}/events", get(execution_events))
        .route(
            "/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/{id}/export", get(export_workflow))
        .route("/{id}/validate", post(validate_workflow))
        .route("/{id}/execute", post(execute_workflow))
        .route("/{id}/executions", get(list_executions));

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/v1/workflows", workflows)
        .nest("/api/v1/mcp", mcp::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub async fn serve(engine: Arc<Engine>, addr: &str) -> crate::flow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(engine)).await?;
    Ok(())
}

/// Parse a JSON body, treating an empty body as `T::default()`
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_workflows(State(engine): State<AppState>) -> ApiResult<Json<Value>> {
    let defs = engine.catalog().list().await?;
    let defs: Vec<&WorkflowDefinition> = defs.iter().map(|d| d.as_ref()).collect();
    Ok(Json(serde_json::to_value(defs)?))
}

async fn create_workflow(
    State(engine): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let def: WorkflowDefinition = serde_json::from_slice(&body)?;
    let created = engine.catalog().create(def).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(created.as_ref())?),
    ))
}

async fn get_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let def = engine.catalog().get(&id).await?;
    Ok(Json(serde_json::to_value(def.as_ref())?))
}

async fn update_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let def: WorkflowDefinition = serde_json::from_slice(&body)?;
    let updated = engine.catalog().update(&id, def).await?;
    Ok(Json(serde_json::to_value(updated.as_ref())?))
}

async fn delete_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    engine.catalog().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn import_workflow(
    State(engine): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let document: Value = serde_json::from_slice(&body)?;
    let imported = engine.catalog().import(document).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::to_value(imported.as_ref())?),
    ))
}

async fn export_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(engine.catalog().export(&id).await?))
}

async fn list_node_types(State(engine): State<AppState>) -> ApiResult<Json<Value>> {
    let groups = engine.registry().describe().await;
    Ok(Json(serde_json::to_value(groups)?))
}

async fn validate_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let def = engine.catalog().get(&id).await?;
    let result = engine.validate(&def).await;
    Ok(Json(serde_json::to_value(result)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    idempotency_key: Option<String>,
}

async fn execute_workflow(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    let request: ExecuteRequest = parse_body(&body)?;
    let execution_id = engine
        .start_run(&id, request.data, request.idempotency_key)
        .await?;
    let execution = engine.get_execution(&execution_id).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

async fn list_executions(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Execution>>> {
    Ok(Json(engine.list_executions(&id).await?))
}

async fn get_execution(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Execution>> {
    Ok(Json(engine.get_execution(&id).await?))
}

async fn stop_execution(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Execution>> {
    engine.cancel_run(&id).await?;
    Ok(Json(engine.get_execution(&id).await?))
}

/// Server-sent events for one execution; the stream closes after `runFinished`
async fn execution_events(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    // Subscribe before reading the record so the final event cannot be missed
    let mut events = engine.subscribe();
    let execution = engine.get_execution(&id).await?;
    let (tx, rx) = mpsc::channel(SSE_BUFFER);

    tokio::spawn(async move {
        if execution.is_terminal() {
            let _ = tx
                .send(ExecutionEvent::RunFinished {
                    execution_id: execution.id.clone(),
                    status: execution.status.to_string(),
                    error: execution.error.clone(),
                })
                .await;
            return;
        }

        loop {
            match events.recv().await {
                Ok(event) if event.execution_id() == id => {
                    let terminal = event.is_terminal();
                    if tx.send(event).await.is_err() || terminal {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("SSE client for execution {} lagged by {} events", id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
