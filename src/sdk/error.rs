// SPDX-License-Identifier: MIT

//! Typed error handling for nodeflow
//!
//! Pre-run failures (`ValidationError`, `CycleError`) abort a run before any
//! node executes. `NodeError` is recorded per node and never aborts
//! independent branches.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for nodeflow
#[derive(Debug, Error)]
pub enum FlowError {
    /// The definition failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The definition is not a DAG
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Any other failure to produce an execution plan
    #[error("Planning error: {0}")]
    Planning(String),

    /// A single node failed
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Workflow id not present in the catalog
    #[error("Workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// Execution id not present in the store
    #[error("Execution '{0}' not found")]
    ExecutionNotFound(String),

    /// Server name not present in the MCP configuration
    #[error("MCP server '{0}' not found")]
    McpServerNotFound(String),

    /// Persistence errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration errors (bad values, unreadable config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a planning error
    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// True for the errors that reject a definition before a run starts
    pub fn is_pre_run(&self) -> bool {
        matches!(
            self,
            FlowError::Validation(_) | FlowError::Cycle(_) | FlowError::Planning(_)
        )
    }
}

impl From<String> for FlowError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for FlowError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

/// A single blocking or informational finding about a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            edge_id: None,
            message: message.into(),
        }
    }

    pub fn edge(edge_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            edge_id: Some(edge_id.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node_id, &self.edge_id) {
            (Some(node), _) => write!(f, "node '{}': {}", node, self.message),
            (None, Some(edge)) => write!(f, "edge '{}': {}", edge, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// Blocking validation failures, reported together
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid workflow: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The dependency graph contains a cycle; `cycle` lists it in traversal order
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Circular dependency detected: {}", .cycle.join(" -> "))]
pub struct CycleError {
    pub cycle: Vec<String>,
}

/// Failure categories for a single node invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeErrorKind {
    /// The node implementation reported an error
    Failed,
    /// The node exceeded its configured timeout
    Timeout,
    /// The node observed a cancellation request and aborted
    Canceled,
    /// The resolved inputs or static configuration were unusable
    InvalidInput,
}

/// Error produced by a node invocation
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
}

impl NodeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: NodeErrorKind::Timeout,
            message: format!("Node timed out after {}s", after.as_secs_f64()),
        }
    }

    pub fn canceled() -> Self {
        Self {
            kind: NodeErrorKind::Canceled,
            message: "Node canceled".to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: NodeErrorKind::InvalidInput,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_input(err.to_string())
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        Self::failed(err.to_string())
    }
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("{0} already exists")]
    Duplicate(String),
}
