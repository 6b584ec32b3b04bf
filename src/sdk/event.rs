// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// Progress notifications published while a run executes.
///
/// Consumers (SSE clients, the CLI) may lag or disconnect; the execution
/// store stays the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ExecutionEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted {
        execution_id: String,
        workflow_id: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeStarted { execution_id: String, node_id: String },
    #[serde(rename_all = "camelCase")]
    NodeFinished {
        execution_id: String,
        node_id: String,
        /// Terminal per-node status (`success`, `error`, `skipped`)
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RunFinished {
        execution_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { execution_id, .. }
            | ExecutionEvent::NodeStarted { execution_id, .. }
            | ExecutionEvent::NodeFinished { execution_id, .. }
            | ExecutionEvent::RunFinished { execution_id, .. } => execution_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionEvent::RunFinished { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ExecutionEvent::NodeFinished {
            execution_id: "e1".into(),
            node_id: "fetch".into(),
            status: "success".into(),
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "nodeFinished");
        assert_eq!(json["executionId"], "e1");
        assert_eq!(json["nodeId"], "fetch");
        assert!(json.get("error").is_none());
        assert_eq!(event.execution_id(), "e1");
        assert!(!event.is_terminal());
    }
}
