// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::config_schema;
use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

static FAIL_SCHEMA: Lazy<Value> = Lazy::new(config_schema::<FailConfig>);

#[derive(Debug, Deserialize, JsonSchema)]
struct FailConfig {
    /// Error message reported for the node
    #[serde(default)]
    message: Option<String>,
}

/// Always fails; useful for testing error paths and error workflows
pub struct FailNode;

#[async_trait]
impl NodeExecutor for FailNode {
    fn node_type(&self) -> &str {
        "fail"
    }

    fn display_name(&self) -> &str {
        "Stop and Error"
    }

    fn description(&self) -> &str {
        "Fail the node with a custom message"
    }

    fn schema(&self) -> Option<&Value> {
        Some(&*FAIL_SCHEMA)
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: FailConfig = ctx.config()?;
        Err(NodeError::failed(
            config
                .message
                .unwrap_or_else(|| "Workflow stopped by fail node".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::nodes::testing::ctx;
    use serde_json::json;

    #[tokio::test]
    async fn test_fails_with_message() {
        let err = FailNode
            .execute(ctx("fail", json!({"message": "quota exceeded"}), json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.message, "quota exceeded");
    }

    #[tokio::test]
    async fn test_default_message() {
        let err = FailNode
            .execute(ctx("fail", Value::Null, json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Workflow stopped by fail node");
    }
}
