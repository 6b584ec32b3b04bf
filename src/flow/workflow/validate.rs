// SPDX-License-Identifier: MIT

//! Structural validation of workflow definitions
//!
//! Validation is pure: it reads the definition and a frozen registry
//! snapshot and reports findings. Errors block a run, warnings are
//! informational.

use serde::Serialize;
use std::collections::HashSet;

use super::registry::RegistrySnapshot;
use super::types::{Node, WorkflowDefinition};
use crate::sdk::{ValidationError, ValidationIssue};

/// Findings for one definition
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert blocking findings into an error, passing warnings through
    pub fn into_result(self) -> Result<Vec<ValidationIssue>, ValidationError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ValidationError {
                issues: self.errors,
            })
        }
    }
}

/// Input ports of a node: its own declaration, else its executor's
pub fn input_ports(node: &Node, types: &RegistrySnapshot) -> Option<Vec<String>> {
    match &node.inputs {
        Some(decl) => Some(decl.to_vec()),
        None => types.resolve(&node.node_type).map(|e| e.inputs()),
    }
}

/// Output ports of a node: its own declaration, else its executor's
pub fn output_ports(node: &Node, types: &RegistrySnapshot) -> Option<Vec<String>> {
    match &node.outputs {
        Some(decl) => Some(decl.to_vec()),
        None => types.resolve(&node.node_type).map(|e| e.outputs()),
    }
}

/// Validate a definition against the known node types
pub fn validate(def: &WorkflowDefinition, types: &RegistrySnapshot) -> ValidationResult {
    let mut result = ValidationResult::default();

    check_nodes(def, types, &mut result);
    check_edges(def, types, &mut result);
    check_connectivity(def, &mut result);
    check_configuration(def, types, &mut result);

    result
}

fn check_nodes(def: &WorkflowDefinition, types: &RegistrySnapshot, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for node in &def.nodes {
        if node.id.trim().is_empty() {
            result
                .errors
                .push(ValidationIssue::node(&node.id, "Node id must not be empty"));
        }
        if !seen.insert(node.id.as_str()) {
            result
                .errors
                .push(ValidationIssue::node(&node.id, "Duplicate node id"));
        }
        if !types.contains(&node.node_type) {
            result.errors.push(ValidationIssue::node(
                &node.id,
                format!("Unknown node type '{}'", node.node_type),
            ));
        }
    }
}

fn check_edges(def: &WorkflowDefinition, types: &RegistrySnapshot, result: &mut ValidationResult) {
    let mut ids = HashSet::new();
    let mut endpoints = HashSet::new();

    for edge in &def.connections {
        if !ids.insert(edge.id.as_str()) {
            result
                .errors
                .push(ValidationIssue::edge(&edge.id, "Duplicate connection id"));
        }
        if !endpoints.insert(edge.endpoint_key()) {
            result.errors.push(ValidationIssue::edge(
                &edge.id,
                format!(
                    "Duplicate connection {}:{} -> {}:{}",
                    edge.source,
                    edge.source_port(),
                    edge.target,
                    edge.target_port()
                ),
            ));
        }

        match def.node(&edge.source) {
            None => result.errors.push(ValidationIssue::edge(
                &edge.id,
                format!("Source node '{}' does not exist", edge.source),
            )),
            Some(source) => {
                if let Some(ports) = output_ports(source, types) {
                    if !ports.iter().any(|p| p == edge.source_port()) {
                        result.errors.push(ValidationIssue::edge(
                            &edge.id,
                            format!(
                                "Node '{}' has no output port '{}'",
                                source.id,
                                edge.source_port()
                            ),
                        ));
                    }
                }
            }
        }

        match def.node(&edge.target) {
            None => result.errors.push(ValidationIssue::edge(
                &edge.id,
                format!("Target node '{}' does not exist", edge.target),
            )),
            Some(target) => {
                if let Some(ports) = input_ports(target, types) {
                    if !ports.iter().any(|p| p == edge.target_port()) {
                        result.errors.push(ValidationIssue::edge(
                            &edge.id,
                            format!(
                                "Node '{}' has no input port '{}'",
                                target.id,
                                edge.target_port()
                            ),
                        ));
                    }
                }
            }
        }
    }
}

fn check_connectivity(def: &WorkflowDefinition, result: &mut ValidationResult) {
    if def.nodes.len() <= 1 {
        return;
    }
    for node in &def.nodes {
        let connected = def
            .connections
            .iter()
            .any(|e| e.source == node.id || e.target == node.id);
        if !connected {
            result.warnings.push(ValidationIssue::node(
                &node.id,
                "Node is not connected to the workflow",
            ));
        }
    }
}

fn check_configuration(
    def: &WorkflowDefinition,
    types: &RegistrySnapshot,
    result: &mut ValidationResult,
) {
    for node in &def.nodes {
        let requires_config = types
            .resolve(&node.node_type)
            .is_some_and(|e| e.requires_config());
        if requires_config && node.has_empty_data() {
            result.warnings.push(ValidationIssue::node(
                &node.id,
                "Node configuration is incomplete",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::workflow::registry::NodeTypeRegistry;
    use crate::flow::workflow::types::Edge;
    use crate::sdk::{NodeContext, NodeError, NodeExecutor, NodeOutput};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct PassNode {
        name: &'static str,
        schema: Option<Value>,
    }

    #[async_trait]
    impl NodeExecutor for PassNode {
        fn node_type(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Passes main through"
        }

        fn schema(&self) -> Option<&Value> {
            self.schema.as_ref()
        }

        async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::main(ctx.main_input().clone()))
        }
    }

    async fn types() -> RegistrySnapshot {
        let registry = NodeTypeRegistry::new();
        registry
            .register(Arc::new(PassNode {
                name: "pass",
                schema: None,
            }))
            .await;
        registry
            .register(Arc::new(PassNode {
                name: "configured",
                schema: Some(json!({"type": "object"})),
            }))
            .await;
        registry.snapshot().await
    }

    fn chain() -> WorkflowDefinition {
        WorkflowDefinition::new("chain")
            .with_node(Node::new("a", "pass"))
            .with_node(Node::new("b", "pass"))
            .with_edge(Edge::new("e1", "a", "b"))
    }

    #[tokio::test]
    async fn test_valid_chain() {
        let result = validate(&chain(), &types().await);
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_type_and_duplicate_node() {
        let def = chain()
            .with_node(Node::new("a", "pass"))
            .with_node(Node::new("c", "teleport"));
        let result = validate(&def, &types().await);

        assert!(result
            .errors
            .iter()
            .any(|i| i.node_id.as_deref() == Some("a") && i.message == "Duplicate node id"));
        assert!(result
            .errors
            .iter()
            .any(|i| i.message == "Unknown node type 'teleport'"));
    }

    #[tokio::test]
    async fn test_dangling_edge() {
        let def = chain().with_edge(Edge::new("e2", "b", "ghost"));
        let result = validate(&def, &types().await);

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].edge_id.as_deref(), Some("e2"));
        assert!(result.errors[0].message.contains("'ghost' does not exist"));
    }

    #[tokio::test]
    async fn test_duplicate_edge_tuple() {
        let def = chain().with_edge(Edge::new("e2", "a", "b"));
        let result = validate(&def, &types().await);

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.starts_with("Duplicate connection"));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let def = WorkflowDefinition::new("handles")
            .with_node(Node::new("a", "pass"))
            .with_node(Node::new("b", "pass").with_inputs(&["left", "right"]))
            .with_edge(Edge::new("e1", "a", "b").with_handles("main", "left"))
            .with_edge(Edge::new("e2", "a", "b").with_handles("main", "middle"))
            .with_edge(Edge::new("e3", "a", "b").with_handles("other", "right"));
        let result = validate(&def, &types().await);

        let messages: Vec<_> = result.errors.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.contains(&"Node 'b' has no input port 'middle'"));
        assert!(messages.contains(&"Node 'a' has no output port 'other'"));
    }

    #[tokio::test]
    async fn test_isolated_node_is_warning() {
        let def = chain().with_node(Node::new("lonely", "pass"));
        let result = validate(&def, &types().await);

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].node_id.as_deref(), Some("lonely"));
    }

    #[tokio::test]
    async fn test_single_node_is_not_isolated() {
        let def = WorkflowDefinition::new("solo").with_node(Node::new("a", "pass"));
        let result = validate(&def, &types().await);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_configuration_warning() {
        let def = WorkflowDefinition::new("cfg")
            .with_node(Node::new("a", "configured"))
            .with_node(Node::new("b", "configured").with_data(json!({"x": 1})))
            .with_edge(Edge::new("e1", "a", "b"));
        let result = validate(&def, &types().await);

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].message, "Node configuration is incomplete");
    }

    #[tokio::test]
    async fn test_into_result() {
        let ok = validate(&chain(), &types().await).into_result();
        assert!(ok.is_ok());

        let bad = validate(
            &chain().with_edge(Edge::new("e9", "a", "nowhere")),
            &types().await,
        )
        .into_result();
        assert_eq!(bad.unwrap_err().issues.len(), 1);
    }
}
