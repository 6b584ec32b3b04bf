// SPDX-License-Identifier: MIT

//! Runtime data storage for workflow execution

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::flow::workflow::types::WorkflowDefinition;
use crate::sdk::{NodeOutput, PortValues, MAIN_PORT};

/// Values produced by successful nodes, keyed by node id then output port
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunData {
    fields: BTreeMap<String, PortValues>,
}

impl RunData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge a node's output into the bag; a port written twice keeps the last value
    pub fn record(&mut self, node_id: &str, output: &NodeOutput) {
        let ports = self.fields.entry(node_id.to_string()).or_default();
        for (port, value) in &output.ports {
            ports.insert(port.clone(), value.clone());
        }
    }

    /// Value a node produced on a port
    pub fn get(&self, node_id: &str, port: &str) -> Option<&Value> {
        self.fields.get(node_id).and_then(|ports| ports.get(port))
    }

    /// Resolve the inputs of `node_id` from its incoming connections.
    ///
    /// Each connection places the producer's value on `sourceHandle` at the
    /// consumer's `targetHandle`. Several connections into one port collect
    /// into an array ordered by connection id. Nodes without incoming
    /// connections receive `trigger` on `main`.
    pub fn resolve_inputs(
        &self,
        def: &WorkflowDefinition,
        node_id: &str,
        trigger: &Value,
    ) -> PortValues {
        let mut incoming: Vec<_> = def.incoming(node_id).collect();
        let mut inputs = Map::new();
        if incoming.is_empty() {
            inputs.insert(MAIN_PORT.to_string(), trigger.clone());
            return inputs;
        }
        incoming.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_port: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for edge in incoming {
            let value = self
                .get(&edge.source, edge.source_port())
                .cloned()
                .unwrap_or(Value::Null);
            by_port.entry(edge.target_port()).or_default().push(value);
        }

        for (port, mut values) in by_port {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            inputs.insert(port.to_string(), value);
        }
        inputs
    }

    /// Convert the bag to a JSON object `{node: {port: value}}`
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::workflow::types::{Edge, Node};
    use serde_json::json;

    #[test]
    fn test_empty_state() {
        let data = RunData::empty();
        assert!(data.get("anything", "main").is_none());
    }

    #[test]
    fn test_record_merges_ports() {
        let mut data = RunData::empty();
        data.record("fetch", &NodeOutput::main(json!(1)));
        data.record("fetch", &NodeOutput::default().with_port("meta", json!("m")));

        assert_eq!(data.get("fetch", "main"), Some(&json!(1)));
        assert_eq!(data.get("fetch", "meta"), Some(&json!("m")));
    }

    #[test]
    fn test_to_json_nests_ports() {
        let mut data = RunData::empty();
        assert_eq!(data.to_json(), json!({}));
        data.record("a", &NodeOutput::main(json!("hello")));
        assert_eq!(data.to_json(), json!({"a": {"main": "hello"}}));
    }

    #[test]
    fn test_root_receives_trigger() {
        let def = WorkflowDefinition::new("wf").with_node(Node::new("t", "trigger"));
        let inputs = RunData::empty().resolve_inputs(&def, "t", &json!({"q": 1}));
        assert_eq!(Value::Object(inputs), json!({"main": {"q": 1}}));
    }

    #[test]
    fn test_resolve_inputs_maps_handles() {
        let def = WorkflowDefinition::new("wf")
            .with_node(Node::new("a", "set"))
            .with_node(Node::new("b", "set"))
            .with_node(Node::new("join", "merge"))
            .with_edge(Edge::new("e1", "a", "join").with_handles("main", "left"))
            .with_edge(Edge::new("e2", "b", "join").with_handles("extra", "right"));

        let mut data = RunData::empty();
        data.record("a", &NodeOutput::main(json!("A")));
        data.record("b", &NodeOutput::main(json!("B")).with_port("extra", json!("X")));

        let inputs = data.resolve_inputs(&def, "join", &Value::Null);
        assert_eq!(Value::Object(inputs), json!({"left": "A", "right": "X"}));
    }

    #[test]
    fn test_fan_in_collects_in_edge_order() {
        let def = WorkflowDefinition::new("wf")
            .with_node(Node::new("a", "set"))
            .with_node(Node::new("b", "set"))
            .with_node(Node::new("c", "set"))
            .with_edge(Edge::new("e2", "b", "c"))
            .with_edge(Edge::new("e1", "a", "c"));

        let mut data = RunData::empty();
        data.record("a", &NodeOutput::main(json!(1)));
        data.record("b", &NodeOutput::main(json!(2)));

        let inputs = data.resolve_inputs(&def, "c", &Value::Null);
        assert_eq!(inputs["main"], json!([1, 2]));
    }

    #[test]
    fn test_missing_port_resolves_null() {
        let def = WorkflowDefinition::new("wf")
            .with_node(Node::new("a", "set"))
            .with_node(Node::new("b", "set"))
            .with_edge(Edge::new("e1", "a", "b"));

        let inputs = RunData::empty().resolve_inputs(&def, "b", &json!("ignored"));
        assert_eq!(inputs["main"], Value::Null);
    }
}
