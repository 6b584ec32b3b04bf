// SPDX-License-Identifier: MIT

//! Workflow definition types
//!
//! This module contains the data structures for workflow definitions as
//! produced by the visual editor (JSON) or written by hand (YAML). Field
//! names follow the editor's camelCase wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sdk::MAIN_PORT;

/// Immutable snapshot of a workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Catalog id; absent until the definition is saved
    #[serde(default)]
    pub id: Option<String>,
    /// Definition version, bumped on every saved edit
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Edge>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Create an empty, unsaved definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            version: default_version(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: Map::new(),
            settings: WorkflowSettings::default(),
            tags: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Id for logs and records; unsaved definitions fall back to their name
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges whose target is `node_id`
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.connections.iter().filter(move |e| e.target == node_id)
    }

    /// Edges whose source is `node_id`
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.connections.iter().filter(move |e| e.source == node_id)
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.connections.push(edge);
        self
    }
}

/// A node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within the definition
    pub id: String,
    /// Selects the node executor implementation
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Editor canvas position; ignored by the engine
    #[serde(default)]
    pub position: Position,
    /// Static configuration handed to the executor
    #[serde(default)]
    pub data: Value,
    /// Declared input ports (overrides the executor's defaults)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<PortDecl>,
    /// Declared output ports (overrides the executor's defaults)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<PortDecl>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            position: Position::default(),
            data: Value::Null,
            inputs: None,
            outputs: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_inputs(mut self, ports: &[&str]) -> Self {
        self.inputs = Some(PortDecl::Names(ports.iter().map(|p| p.to_string()).collect()));
        self
    }

    pub fn with_outputs(mut self, ports: &[&str]) -> Self {
        self.outputs = Some(PortDecl::Names(ports.iter().map(|p| p.to_string()).collect()));
        self
    }

    /// True when `data` carries no configuration at all
    pub fn has_empty_data(&self) -> bool {
        match &self.data {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

/// Editor canvas coordinates
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Port declaration (list of names, or an object keyed by port name)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PortDecl {
    Names(Vec<String>),
    Described(Map<String, Value>),
}

impl PortDecl {
    /// Convert to a list of port names
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            PortDecl::Names(v) => v.clone(),
            PortDecl::Described(m) => m.keys().cloned().collect(),
        }
    }
}

/// Directed connection between two node ports
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    /// Create an edge between the `main` ports of two nodes
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_handles(
        mut self,
        source_handle: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        self.source_handle = Some(source_handle.into());
        self.target_handle = Some(target_handle.into());
        self
    }

    pub fn source_port(&self) -> &str {
        self.source_handle.as_deref().unwrap_or(MAIN_PORT)
    }

    pub fn target_port(&self) -> &str {
        self.target_handle.as_deref().unwrap_or(MAIN_PORT)
    }

    /// Identity used for duplicate detection
    pub fn endpoint_key(&self) -> (&str, &str, &str, &str) {
        (
            self.source.as_str(),
            self.source_port(),
            self.target.as_str(),
            self.target_port(),
        )
    }
}

/// Per-workflow settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Workflow launched (fire-and-forget) when a run ends in `error`
    #[serde(default)]
    pub error_workflow: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub save_data_error_execution: SaveDataPolicy,
    #[serde(default)]
    pub save_data_success_execution: SaveDataPolicy,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            error_workflow: None,
            timezone: default_timezone(),
            save_data_error_execution: SaveDataPolicy::default(),
            save_data_success_execution: SaveDataPolicy::default(),
        }
    }
}

/// Retention of per-node payloads once a run is terminal
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaveDataPolicy {
    /// Keep node inputs/outputs and the run's data bag (default)
    #[default]
    All,
    /// Keep statuses and errors only
    None,
}
