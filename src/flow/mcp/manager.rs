// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{create_mcp_service, McpServerConfig, McpService};
use crate::flow::Result;
use crate::sdk::{FlowError, NodeError};

/// Anything able to list and call tools on named servers
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Configured server names, sorted
    fn server_names(&self) -> Vec<String>;

    /// Tool descriptors (`name`, `description`, `inputSchema`) of one server
    async fn list_tools(&self, server: &str) -> std::result::Result<Vec<Value>, NodeError>;

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<Value, NodeError>;

    /// Connect to a server that is not part of the configuration and list
    /// its tools, without keeping the connection
    async fn test_server(
        &self,
        config: &McpServerConfig,
    ) -> std::result::Result<Vec<Value>, NodeError>;

    fn has_server(&self, name: &str) -> bool {
        self.server_names().iter().any(|s| s == name)
    }
}

/// A configured server and its connection, made on first use
struct ServerSlot {
    config: McpServerConfig,
    service: OnceCell<Arc<McpService>>,
}

/// Manages the lifecycle of MCP services
pub struct McpServiceManager {
    servers: HashMap<String, ServerSlot>,
}

impl McpServiceManager {
    pub fn new(configs: Vec<McpServerConfig>) -> Self {
        let servers = configs
            .into_iter()
            .map(|config| {
                let slot = ServerSlot {
                    config: config.clone(),
                    service: OnceCell::new(),
                };
                (config.name, slot)
            })
            .collect();
        Self { servers }
    }

    /// Get or create the running service for a configured server.
    ///
    /// Each server connects independently; a slow handshake only holds up
    /// callers of that server. A failed connection is retried on next use.
    pub async fn get_or_create_service(&self, name: &str) -> Result<Arc<McpService>> {
        let slot = self
            .servers
            .get(name)
            .ok_or_else(|| FlowError::config(format!("Unknown MCP server '{}'", name)))?;

        let service = slot
            .service
            .get_or_try_init(|| async {
                log::info!(
                    "Creating MCP service '{}' with command: {} {:?}",
                    slot.config.name,
                    slot.config.command,
                    slot.config.args
                );
                create_mcp_service(&slot.config).await.map(Arc::new)
            })
            .await?;
        Ok(service.clone())
    }

    async fn service_for(&self, server: &str) -> std::result::Result<Arc<McpService>, NodeError> {
        if !self.servers.contains_key(server) {
            return Err(NodeError::invalid_input(format!(
                "Unknown MCP server '{}'",
                server
            )));
        }
        self.get_or_create_service(server)
            .await
            .map_err(|e| NodeError::failed(e.to_string()))
    }
}

impl Default for McpServiceManager {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

async fn list_service_tools(
    service: &McpService,
    server: &str,
) -> std::result::Result<Vec<Value>, NodeError> {
    let tools = service.list_all_tools().await.map_err(|e| {
        NodeError::failed(format!("Listing tools of MCP server '{}' failed: {}", server, e))
    })?;
    let tools = tools
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tools)
}

#[async_trait]
impl ToolCaller for McpServiceManager {
    fn server_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    async fn list_tools(&self, server: &str) -> std::result::Result<Vec<Value>, NodeError> {
        let service = self.service_for(server).await?;
        list_service_tools(&service, server).await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<Value, NodeError> {
        let service = self.service_for(server).await?;

        let result = service
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| NodeError::failed(format!("MCP tool '{}' failed: {}", tool, e)))?;

        let value = serde_json::to_value(result)?;
        if value.get("isError").and_then(Value::as_bool) == Some(true) {
            return Err(NodeError::failed(format!(
                "MCP tool '{}' reported an error: {}",
                tool,
                value.get("content").cloned().unwrap_or(Value::Null)
            )));
        }
        Ok(value)
    }

    async fn test_server(
        &self,
        config: &McpServerConfig,
    ) -> std::result::Result<Vec<Value>, NodeError> {
        let service = create_mcp_service(config)
            .await
            .map_err(|e| NodeError::failed(e.to_string()))?;
        let tools = list_service_tools(&service, &config.name).await;
        if let Err(e) = service.cancel().await {
            log::warn!("MCP test connection '{}' did not shut down: {}", config.name, e);
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::NodeErrorKind;
    use std::time::Duration;

    fn config(name: &str) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            command: "mcp-server".to_string(),
            args: vec![],
        }
    }

    fn command_config(name: &str, command: &str, args: &[&str]) -> McpServerConfig {
        McpServerConfig {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_server_names_sorted() {
        let manager = McpServiceManager::new(vec![config("zeta"), config("alpha")]);
        assert_eq!(manager.server_names(), vec!["alpha", "zeta"]);
        assert!(manager.has_server("alpha"));
        assert!(!manager.has_server("beta"));
    }

    #[tokio::test]
    async fn test_unknown_server_is_node_error() {
        let manager = McpServiceManager::default();
        let err = manager
            .call_tool("missing", "read_file", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::InvalidInput);
        assert!(err.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_unknown_server_has_no_service() {
        let manager = McpServiceManager::default();
        let result = manager.get_or_create_service("nope").await;
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[tokio::test]
    async fn test_slow_server_does_not_block_others() {
        // `sleep` never answers the handshake
        let manager = Arc::new(McpServiceManager::new(vec![
            command_config("slow", "sleep", &["5"]),
            command_config("absent", "nodeflow-no-such-binary", &[]),
        ]));

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_or_create_service("slow").await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let other = tokio::time::timeout(
            Duration::from_secs(2),
            manager.get_or_create_service("absent"),
        )
        .await
        .expect("connecting one server must not wait for another");
        assert!(other.is_err());
        assert!(!slow.is_finished());
        slow.abort();
    }

    #[tokio::test]
    async fn test_failed_connection_is_retried() {
        let manager = McpServiceManager::new(vec![command_config(
            "absent",
            "nodeflow-no-such-binary",
            &[],
        )]);
        assert!(manager.get_or_create_service("absent").await.is_err());

        let err = manager.list_tools("absent").await.unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::Failed);
    }

    #[tokio::test]
    async fn test_list_tools_of_unknown_server() {
        let manager = McpServiceManager::default();
        let err = manager.list_tools("missing").await.unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_server_reports_spawn_failure() {
        let manager = McpServiceManager::default();
        let err = manager
            .test_server(&command_config("candidate", "nodeflow-no-such-binary", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::Failed);
    }
}
