// SPDX-License-Identifier: MIT

use async_trait::async_trait;

use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

/// Entry point of a workflow; emits the run's trigger data
pub struct TriggerNode;

#[async_trait]
impl NodeExecutor for TriggerNode {
    fn node_type(&self) -> &str {
        "trigger"
    }

    fn display_name(&self) -> &str {
        "Manual Trigger"
    }

    fn description(&self) -> &str {
        "Starts the workflow with the data it was triggered with"
    }

    fn group(&self) -> &str {
        "trigger"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::main(ctx.main_input().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::nodes::testing::ctx;
    use serde_json::json;

    #[tokio::test]
    async fn test_emits_trigger_data() {
        let output = TriggerNode
            .execute(ctx("trigger", json!({}), json!({"main": {"id": 7}})))
            .await
            .unwrap();
        assert_eq!(output.get("main"), Some(&json!({"id": 7})));
    }
}
