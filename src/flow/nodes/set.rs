// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::config_schema;
use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};

static SET_SCHEMA: Lazy<Value> = Lazy::new(config_schema::<SetConfig>);

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SetConfig {
    /// Fields to emit
    #[serde(default)]
    values: Map<String, Value>,
    /// Merge the fields over the incoming object instead of replacing it
    #[serde(default)]
    keep_input: bool,
}

/// Emits fixed values, optionally merged over its input
pub struct SetNode;

#[async_trait]
impl NodeExecutor for SetNode {
    fn node_type(&self) -> &str {
        "set"
    }

    fn display_name(&self) -> &str {
        "Set"
    }

    fn description(&self) -> &str {
        "Set fields on the data passed to the next node"
    }

    fn schema(&self) -> Option<&Value> {
        Some(&*SET_SCHEMA)
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: SetConfig = ctx.config()?;

        let mut output = match (config.keep_input, ctx.main_input()) {
            (true, Value::Object(input)) => input.clone(),
            _ => Map::new(),
        };
        output.extend(config.values);

        Ok(NodeOutput::main(Value::Object(output)))
    }
}
