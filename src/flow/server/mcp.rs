// SPDX-License-Identifier: MIT

//! MCP routes: configured servers, their tools, direct calls and
//! connection tests for servers that are not configured yet.

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{AppState, ApiResult};
use crate::flow::mcp::McpServerConfig;
use crate::sdk::FlowError;

/// Tools returned by a connection test
const TEST_PREVIEW_TOOLS: usize = 5;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/servers", get(list_servers))
        .route("/servers/{id}/tools", get(list_server_tools))
        .route("/call", post(call_tool))
        .route("/test", post(test_server))
}

fn ensure_server(engine: &AppState, server: &str) -> ApiResult<()> {
    if !engine.tools().has_server(server) {
        return Err(FlowError::McpServerNotFound(server.to_string()).into());
    }
    Ok(())
}

async fn list_servers(State(engine): State<AppState>) -> Json<Value> {
    let tools = engine.tools();
    let names = tools.server_names();
    let listings = join_all(names.iter().map(|name| tools.list_tools(name))).await;

    let servers: Vec<Value> = names
        .iter()
        .zip(listings)
        .map(|(name, listing)| match listing {
            Ok(tools) => json!({
                "id": name,
                "name": name,
                "status": "connected",
                "toolsCount": tools.len(),
            }),
            Err(e) => {
                log::warn!("MCP server '{}' is unavailable: {}", name, e);
                json!({
                    "id": name,
                    "name": name,
                    "status": "disconnected",
                    "toolsCount": 0,
                })
            }
        })
        .collect();
    Json(json!({ "servers": servers }))
}

async fn list_server_tools(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    ensure_server(&engine, &id)?;
    let tools = engine.tools().list_tools(&id).await?;
    Ok(Json(json!({ "serverId": id, "tools": tools })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallRequest {
    server_id: String,
    tool_name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// A failing tool is reported in the body; only an unknown server is an HTTP error
async fn call_tool(State(engine): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: ToolCallRequest = serde_json::from_slice(&body)?;
    ensure_server(&engine, &request.server_id)?;

    let result = match engine
        .tools()
        .call_tool(&request.server_id, &request.tool_name, request.arguments)
        .await
    {
        Ok(result) => json!({ "success": true, "result": result }),
        Err(e) => json!({ "success": false, "error": e.message }),
    };
    Ok(Json(json!({
        "serverId": request.server_id,
        "toolName": request.tool_name,
        "result": result,
    })))
}

async fn test_server(State(engine): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let config: McpServerConfig = serde_json::from_slice(&body)?;

    let response = match engine.tools().test_server(&config).await {
        Ok(tools) => json!({
            "success": true,
            "message": "Connection successful",
            "toolsCount": tools.len(),
            "tools": tools.into_iter().take(TEST_PREVIEW_TOOLS).collect::<Vec<_>>(),
        }),
        Err(e) => {
            log::warn!("MCP connection test of '{}' failed: {}", config.name, e);
            json!({
                "success": false,
                "message": format!("Connection test failed: {}", e.message),
            })
        }
    };
    Ok(Json(response))
}
