// SPDX-License-Identifier: MIT

//! Built-in node types

mod fail;
mod http;
mod mcp_tool;
mod merge;
mod set;
mod trigger;
mod wait;

pub use fail::FailNode;
pub use http::HttpNode;
pub use mcp_tool::McpToolNode;
pub use merge::MergeNode;
pub use set::SetNode;
pub use trigger::TriggerNode;
pub use wait::WaitNode;

use schemars::JsonSchema;
use serde_json::Value;
use std::sync::Arc;

use crate::flow::mcp::ToolCaller;
use crate::flow::workflow::registry::NodeTypeRegistry;

/// Register every built-in node type; `mcp-tool` calls go through `tools`
pub async fn register_builtins(registry: &NodeTypeRegistry, tools: Arc<dyn ToolCaller>) {
    registry.register(Arc::new(TriggerNode)).await;
    registry.register(Arc::new(SetNode)).await;
    registry.register(Arc::new(MergeNode)).await;
    registry.register(Arc::new(WaitNode)).await;
    registry.register(Arc::new(FailNode)).await;
    registry.register(Arc::new(HttpNode::new())).await;
    registry.register(Arc::new(McpToolNode::new(tools))).await;
}

/// JSON schema of a node's `data` configuration
pub(crate) fn config_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

#[cfg(test)]
pub(crate) mod testing {
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;

    use crate::sdk::NodeContext;

    pub fn ctx(node_type: &str, data: Value, inputs: Value) -> NodeContext {
        NodeContext {
            execution_id: "exec-1".to_string(),
            workflow_id: "wf".to_string(),
            node_id: "node".to_string(),
            node_type: node_type.to_string(),
            data,
            inputs: inputs.as_object().cloned().unwrap_or_default(),
            variables: Map::new(),
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::mcp::McpServiceManager;

    #[tokio::test]
    async fn test_register_builtins() {
        let registry = NodeTypeRegistry::new();
        register_builtins(&registry, Arc::new(McpServiceManager::default())).await;

        let types = registry.snapshot().await;
        for name in ["trigger", "set", "merge", "wait", "fail", "http", "mcp-tool"] {
            assert!(types.contains(name), "missing {}", name);
        }

        let groups = types.describe();
        assert!(groups["trigger"].contains_key("trigger"));
        assert!(groups["integrations"]["http"].requires_config);
        assert!(!groups["trigger"]["trigger"].requires_config);
    }
}
