// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;

use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

/// Joins every resolved input into one object keyed by port name.
///
/// Ports come from the node's own `inputs` declaration, e.g. `[left, right]`.
pub struct MergeNode;

#[async_trait]
impl NodeExecutor for MergeNode {
    fn node_type(&self) -> &str {
        "merge"
    }

    fn display_name(&self) -> &str {
        "Merge"
    }

    fn description(&self) -> &str {
        "Combine the outputs of several branches into one object"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::main(Value::Object(ctx.inputs)))
    }
}
