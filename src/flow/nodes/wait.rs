// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::config_schema;
use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

static WAIT_SCHEMA: Lazy<Value> = Lazy::new(config_schema::<WaitConfig>);

#[derive(Debug, Deserialize, JsonSchema)]
struct WaitConfig {
    /// Delay in milliseconds
    #[serde(default)]
    millis: u64,
}

/// Pauses, then forwards its input. Stops early when the run is canceled.
pub struct WaitNode;

#[async_trait]
impl NodeExecutor for WaitNode {
    fn node_type(&self) -> &str {
        "wait"
    }

    fn display_name(&self) -> &str {
        "Wait"
    }

    fn description(&self) -> &str {
        "Wait for a number of milliseconds before continuing"
    }

    fn schema(&self) -> Option<&Value> {
        Some(&*WAIT_SCHEMA)
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: WaitConfig = ctx.config()?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(config.millis)) => {}
            _ = ctx.cancel.cancelled() => return Err(NodeError::canceled()),
        }

        Ok(NodeOutput::main(ctx.main_input().clone()))
    }
}
