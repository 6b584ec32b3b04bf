// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::config_schema;
use crate::flow::mcp::ToolCaller;
use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

static MCP_TOOL_SCHEMA: Lazy<Value> = Lazy::new(config_schema::<McpToolConfig>);

#[derive(Debug, Deserialize, JsonSchema)]
struct McpToolConfig {
    /// Name of a configured MCP server
    server: String,
    tool: String,
    /// Fixed arguments, laid over the node's input object
    #[serde(default)]
    arguments: Map<String, Value>,
}

/// Calls a tool exposed by an MCP server
pub struct McpToolNode {
    tools: Arc<dyn ToolCaller>,
}

impl McpToolNode {
    pub fn new(tools: Arc<dyn ToolCaller>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl NodeExecutor for McpToolNode {
    fn node_type(&self) -> &str {
        "mcp-tool"
    }

    fn display_name(&self) -> &str {
        "MCP Tool"
    }

    fn description(&self) -> &str {
        "Call a tool on a configured MCP server"
    }

    fn group(&self) -> &str {
        "integrations"
    }

    fn schema(&self) -> Option<&Value> {
        Some(&*MCP_TOOL_SCHEMA)
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: McpToolConfig = ctx.config()?;

        let mut arguments = match ctx.main_input() {
            Value::Object(input) => input.clone(),
            _ => Map::new(),
        };
        arguments.extend(config.arguments);

        log::debug!(
            "Node '{}': calling {}/{}",
            ctx.node_id,
            config.server,
            config.tool
        );
        let result = tokio::select! {
            result = self.tools.call_tool(&config.server, &config.tool, arguments) => result?,
            _ = ctx.cancel.cancelled() => return Err(NodeError::canceled()),
        };

        Ok(NodeOutput::main(result))
    }
}
