// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::error::NodeError;

/// Port used when an edge names no handle and a node declares no ports
pub const MAIN_PORT: &str = "main";

/// Values keyed by port name
pub type PortValues = Map<String, Value>;

/// Everything a node invocation is allowed to see.
///
/// The context is owned so invocations can run on their own task; it is a
/// snapshot and writing to it has no effect on the run.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub node_id: String,
    pub node_type: String,
    /// Static configuration from the definition
    pub data: Value,
    /// Resolved input values keyed by target port
    pub inputs: PortValues,
    /// Workflow variables
    pub variables: PortValues,
    /// Run-scoped cancellation signal
    pub cancel: CancellationToken,
}

impl NodeContext {
    /// Value on an input port, `Null` when nothing was connected
    pub fn input(&self, port: &str) -> &Value {
        self.inputs.get(port).unwrap_or(&Value::Null)
    }

    /// Value on the `main` input port
    pub fn main_input(&self) -> &Value {
        self.input(MAIN_PORT)
    }

    /// Deserialize the node's static configuration
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, NodeError> {
        let data = if self.data.is_null() {
            Value::Object(Map::new())
        } else {
            self.data.clone()
        };
        serde_json::from_value(data).map_err(|e| {
            NodeError::invalid_input(format!(
                "Invalid configuration for node '{}': {}",
                self.node_id, e
            ))
        })
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Values produced by a node, keyed by output port
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeOutput {
    pub ports: PortValues,
}

impl NodeOutput {
    /// Output with a single value on `main`
    pub fn main(value: Value) -> Self {
        let mut ports = Map::new();
        ports.insert(MAIN_PORT.to_string(), value);
        Self { ports }
    }

    pub fn with_port(mut self, port: impl Into<String>, value: Value) -> Self {
        self.ports.insert(port.into(), value);
        self
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.ports.get(port)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.ports)
    }
}

/// Self-description of a node type, as listed to editors
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub group: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    pub requires_config: bool,
}

/// Trait for the node type implementations a workflow can reference.
///
/// One implementation handles every node whose `type` equals
/// `node_type()`. `execute` is called once per node per run and must not
/// touch state belonging to other nodes.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type name nodes use to select this implementation (unique per registry)
    fn node_type(&self) -> &str;

    /// Human-readable description of what the node does
    fn description(&self) -> &str;

    fn display_name(&self) -> &str {
        self.node_type()
    }

    fn group(&self) -> &str {
        "core"
    }

    /// Input ports used when a node declares none
    fn inputs(&self) -> Vec<String> {
        vec![MAIN_PORT.to_string()]
    }

    /// Output ports used when a node declares none
    fn outputs(&self) -> Vec<String> {
        vec![MAIN_PORT.to_string()]
    }

    /// JSON schema for the node's `data` configuration
    fn schema(&self) -> Option<&Value> {
        None
    }

    /// Whether an empty `data` object deserves an "incomplete" warning
    fn requires_config(&self) -> bool {
        self.schema().is_some()
    }

    /// Execute the node against its resolved inputs
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    fn describe(&self) -> NodeTypeDescriptor {
        NodeTypeDescriptor {
            name: self.node_type().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
            group: self.group().to_string(),
            inputs: self.inputs(),
            outputs: self.outputs(),
            schema: self.schema().cloned(),
            requires_config: self.requires_config(),
        }
    }
}
