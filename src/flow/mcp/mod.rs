// SPDX-License-Identifier: MIT

//! MCP client integration
//!
//! Servers are spawned as child processes on first use and shared by every
//! `mcp-tool` node that names them.

pub mod manager;

pub use manager::{McpServiceManager, ToolCaller};

use rmcp::model::{ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{ClientHandler, ServiceExt};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::flow::Result;
use crate::sdk::FlowError;

/// MCP server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BasicClientHandler;

impl ClientHandler for BasicClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
        }
    }
}

pub type McpService = RunningService<RoleClient, BasicClientHandler>;

/// Connect to an MCP server over the stdio of a spawned child process.
pub async fn create_mcp_service(config: &McpServerConfig) -> Result<McpService> {
    let mut server_cmd = Command::new(&config.command);
    for arg in &config.args {
        server_cmd.arg(arg);
    }

    let transport = TokioChildProcess::new(server_cmd)?;
    let service = BasicClientHandler.serve(transport).await.map_err(|e| {
        FlowError::other(format!(
            "Failed to initialize MCP server '{}': {}",
            config.name, e
        ))
    })?;

    Ok(service)
}
