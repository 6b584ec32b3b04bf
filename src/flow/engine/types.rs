// SPDX-License-Identifier: MIT

//! Execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::sdk::NodeError;

/// Run state machine: `new -> running -> {success, error, canceled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    New,
    Running,
    Success,
    Error,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Error | ExecutionStatus::Canceled
        )
    }

    /// Transitions only move forward; terminal states absorb everything
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match (self, next) {
            (ExecutionStatus::New, ExecutionStatus::New) => false,
            (ExecutionStatus::New, _) => true,
            (ExecutionStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::New => "new",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ExecutionStatus::New),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "error" => Ok(ExecutionStatus::Error),
            "canceled" => Ok(ExecutionStatus::Canceled),
            other => Err(format!("Unknown execution status '{}'", other)),
        }
    }
}

/// Per-node status; `skipped` marks nodes whose upstream did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Waiting,
    Running,
    Success,
    Error,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Success | NodeStatus::Error | NodeStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Waiting => "waiting",
            NodeStatus::Running => "running",
            NodeStatus::Success => "success",
            NodeStatus::Error => "error",
            NodeStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(NodeStatus::Waiting),
            "running" => Ok(NodeStatus::Running),
            "success" => Ok(NodeStatus::Success),
            "error" => Ok(NodeStatus::Error),
            "skipped" => Ok(NodeStatus::Skipped),
            other => Err(format!("Unknown node status '{}'", other)),
        }
    }
}

/// Result of one node within one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunResult {
    pub node_id: String,
    pub status: NodeStatus,
    /// Resolved input snapshot, keyed by port
    #[serde(default)]
    pub input: Value,
    /// Produced output, keyed by port
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl NodeRunResult {
    pub fn waiting(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Waiting,
            input: Value::Null,
            output: Value::Null,
            error: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Drop payloads, keeping status and error
    pub fn clear_payload(&mut self) {
        self.input = Value::Null;
        self.output = Value::Null;
    }
}

/// A run of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Data bag `{nodeId: {port: value}}` of successful nodes
    #[serde(default)]
    pub data: Value,
    /// Summary of the first node failure, or the pre-run failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default)]
    pub node_results: BTreeMap<String, NodeRunResult>,
}

impl Execution {
    pub fn new(workflow_id: impl Into<String>, workflow_version: u32, trigger_data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            workflow_version,
            status: ExecutionStatus::New,
            started_at: Utc::now(),
            stopped_at: None,
            data: Value::Object(Default::default()),
            error: None,
            idempotency_key: None,
            trigger_data,
            node_results: BTreeMap::new(),
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if allowed; returns false when the transition is ignored
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.stopped_at = Some(Utc::now());
        }
        true
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeRunResult> {
        self.node_results.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node(node_id).map(|r| r.status)
    }

    /// Drop the data bag and node payloads
    pub fn clear_payloads(&mut self) {
        self.data = Value::Object(Default::default());
        for result in self.node_results.values_mut() {
            result.clear_payload();
        }
    }
}
