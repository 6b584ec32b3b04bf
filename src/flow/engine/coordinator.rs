// SPDX-License-Identifier: MIT

//! Execution coordinator
//!
//! One coordinator task drives one run. It is the only writer of the
//! execution record: node tasks report back through a `JoinSet`, and each
//! completion is applied and persisted before any dependent is released.

use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::invoke::invoke;
use super::types::{Execution, ExecutionStatus, NodeRunResult, NodeStatus};
use crate::flow::config::EngineConfig;
use crate::flow::store::ExecutionStore;
use crate::flow::workflow::graph::ExecutionPlan;
use crate::flow::workflow::registry::RegistrySnapshot;
use crate::flow::workflow::state::RunData;
use crate::flow::workflow::types::{SaveDataPolicy, WorkflowDefinition};
use crate::sdk::{ExecutionEvent, NodeContext, NodeError, NodeOutput};

type NodeOutcome = (String, Result<NodeOutput, NodeError>);

/// Terminal record of a run plus the node whose failure decided it
pub struct RunOutcome {
    pub execution: Execution,
    pub failed_node: Option<String>,
}

pub struct Coordinator {
    def: Arc<WorkflowDefinition>,
    plan: ExecutionPlan,
    types: RegistrySnapshot,
    execution: Execution,
    data: RunData,
    store: Arc<dyn ExecutionStore>,
    events: broadcast::Sender<ExecutionEvent>,
    cancel: CancellationToken,
    config: Arc<EngineConfig>,
    first_failure: Option<(String, NodeError)>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        def: Arc<WorkflowDefinition>,
        plan: ExecutionPlan,
        types: RegistrySnapshot,
        execution: Execution,
        store: Arc<dyn ExecutionStore>,
        events: broadcast::Sender<ExecutionEvent>,
        cancel: CancellationToken,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            def,
            plan,
            types,
            execution,
            data: RunData::empty(),
            store,
            events,
            cancel,
            config,
            first_failure: None,
        }
    }

    /// Drive the run to a terminal state
    pub async fn run(mut self) -> RunOutcome {
        let cancel = self.cancel.clone();
        let max_concurrency = self.config.max_concurrency.max(1);
        let run_timeout = self.config.run_timeout();

        let mut pending: HashMap<String, usize> = self
            .plan
            .order
            .iter()
            .map(|id| (id.clone(), self.plan.dependencies(id).len()))
            .collect();
        let mut ready: BTreeSet<String> = self.plan.roots.iter().cloned().collect();
        let mut running: JoinSet<NodeOutcome> = JoinSet::new();
        let mut stopping = false;

        let deadline = async move {
            match run_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            if !stopping {
                // Starting a node awaits the store, so a cancel can land in between
                while running.len() < max_concurrency && !cancel.is_cancelled() {
                    let Some(node_id) = ready.pop_first() else {
                        break;
                    };
                    self.start_node(node_id, &mut running).await;
                }

                if cancel.is_cancelled() {
                    stopping = true;
                    self.stop(ExecutionStatus::Canceled, None).await;
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !stopping => {}
                _ = &mut deadline, if !stopping => {
                    stopping = true;
                    cancel.cancel();
                    let message = format!(
                        "Workflow timed out after {} seconds",
                        run_timeout.unwrap_or_default().as_secs()
                    );
                    self.stop(ExecutionStatus::Error, Some(message)).await;
                }
                joined = running.join_next() => match joined {
                    Some(Ok((node_id, outcome))) => {
                        let released = self.complete_node(&node_id, outcome, &mut pending).await;
                        if !stopping {
                            ready.extend(released);
                        }
                    }
                    Some(Err(e)) => {
                        log::error!("Node task of execution {} was lost: {}", self.execution.id, e);
                    }
                    None => {}
                },
            }
        }

        self.finish().await
    }

    async fn start_node(&mut self, node_id: String, running: &mut JoinSet<NodeOutcome>) {
        let Some(node) = self.def.node(&node_id).cloned() else {
            return;
        };
        let inputs = self
            .data
            .resolve_inputs(&self.def, &node_id, &self.execution.trigger_data);

        let result = self
            .execution
            .node_results
            .entry(node_id.clone())
            .or_insert_with(|| NodeRunResult::waiting(&node_id));
        result.status = NodeStatus::Running;
        result.input = Value::Object(inputs.clone());
        result.started_at = Some(Utc::now());
        self.persist_node(&node_id).await;

        log::debug!(
            "Execution {}: starting node '{}' ({})",
            self.execution.id,
            node_id,
            node.node_type
        );
        self.emit(ExecutionEvent::NodeStarted {
            execution_id: self.execution.id.clone(),
            node_id: node_id.clone(),
        });

        let Some(executor) = self.types.resolve(&node.node_type).cloned() else {
            let message = format!("Unknown node type '{}'", node.node_type);
            running.spawn(async move { (node_id, Err(NodeError::invalid_input(message))) });
            return;
        };

        let timeout = self.config.node_timeout(&node.node_type);
        let ctx = NodeContext {
            execution_id: self.execution.id.clone(),
            workflow_id: self.execution.workflow_id.clone(),
            node_id: node_id.clone(),
            node_type: node.node_type,
            data: node.data,
            inputs,
            variables: self.def.variables.clone(),
            cancel: self.cancel.child_token(),
        };

        running.spawn(async move {
            let outcome = invoke(executor, ctx, timeout).await;
            (node_id, outcome)
        });
    }

    /// Record a finished node; returns dependents that became ready
    async fn complete_node(
        &mut self,
        node_id: &str,
        outcome: Result<NodeOutput, NodeError>,
        pending: &mut HashMap<String, usize>,
    ) -> Vec<String> {
        let execution_id = self.execution.id.clone();
        let result = self
            .execution
            .node_results
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRunResult::waiting(node_id));
        result.stopped_at = Some(Utc::now());

        match outcome {
            Ok(output) => {
                result.status = NodeStatus::Success;
                result.output = output.clone().into_value();
                self.data.record(node_id, &output);
                self.execution.data = self.data.to_json();
                self.persist().await;

                log::info!("Execution {}: node '{}' succeeded", execution_id, node_id);
                self.emit_node_finished(node_id, NodeStatus::Success, None);

                let mut released = Vec::new();
                for dependent in self.plan.dependents(node_id) {
                    if let Some(count) = pending.get_mut(dependent) {
                        *count = count.saturating_sub(1);
                        if *count == 0
                            && self.execution.node_status(dependent) == Some(NodeStatus::Waiting)
                        {
                            released.push(dependent.clone());
                        }
                    }
                }
                released
            }
            Err(err) => {
                result.status = NodeStatus::Error;
                result.error = Some(err.clone());
                self.persist_node(node_id).await;

                log::warn!(
                    "Execution {}: node '{}' failed: {}",
                    execution_id,
                    node_id,
                    err
                );
                self.emit_node_finished(node_id, NodeStatus::Error, Some(err.message.clone()));
                if self.first_failure.is_none() {
                    self.first_failure = Some((node_id.to_string(), err));
                }

                self.skip_dependents(node_id).await;
                Vec::new()
            }
        }
    }

    /// Everything downstream of a failed node can never become ready
    async fn skip_dependents(&mut self, node_id: &str) {
        // A stopped run leaves unstarted nodes waiting
        if self.execution.is_terminal() {
            return;
        }
        for dependent in self.plan.transitive_dependents(node_id) {
            let Some(result) = self.execution.node_results.get_mut(&dependent) else {
                continue;
            };
            if result.status != NodeStatus::Waiting {
                continue;
            }
            result.status = NodeStatus::Skipped;
            result.stopped_at = Some(Utc::now());
            self.persist_node(&dependent).await;

            log::debug!(
                "Execution {}: node '{}' skipped, upstream '{}' failed",
                self.execution.id,
                dependent,
                node_id
            );
            self.emit_node_finished(&dependent, NodeStatus::Skipped, None);
        }
    }

    /// Enter a terminal state early; running nodes are still drained
    async fn stop(&mut self, status: ExecutionStatus, error: Option<String>) {
        if !self.execution.transition(status) {
            log::debug!(
                "Execution {}: ignoring {} on {} run",
                self.execution.id,
                status,
                self.execution.status
            );
            return;
        }
        self.execution.error = error;
        log::info!("Execution {} stopping: {}", self.execution.id, status);
        self.persist().await;
    }

    async fn finish(mut self) -> RunOutcome {
        if !self.execution.is_terminal() {
            match &self.first_failure {
                Some((node_id, err)) => {
                    self.execution.transition(ExecutionStatus::Error);
                    self.execution.error =
                        Some(format!("Node '{}' failed: {}", node_id, err.message));
                }
                None => {
                    self.execution.transition(ExecutionStatus::Success);
                }
            }
        }

        self.execution.data = self.data.to_json();
        let policy = match self.execution.status {
            ExecutionStatus::Success => self.def.settings.save_data_success_execution,
            _ => self.def.settings.save_data_error_execution,
        };
        if policy == SaveDataPolicy::None {
            self.execution.clear_payloads();
        }
        self.persist().await;

        log::info!(
            "Execution {} of workflow '{}' finished: {}",
            self.execution.id,
            self.execution.workflow_id,
            self.execution.status
        );
        self.emit(ExecutionEvent::RunFinished {
            execution_id: self.execution.id.clone(),
            status: self.execution.status.to_string(),
            error: self.execution.error.clone(),
        });

        let failed_node = match self.execution.status {
            ExecutionStatus::Error => self.first_failure.map(|(node_id, _)| node_id),
            _ => None,
        };
        RunOutcome {
            execution: self.execution,
            failed_node,
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.store.update(&self.execution).await {
            log::error!("Failed to persist execution {}: {}", self.execution.id, e);
        }
    }

    async fn persist_node(&self, node_id: &str) {
        let Some(result) = self.execution.node_results.get(node_id) else {
            return;
        };
        if let Err(e) = self.store.put_node_result(&self.execution.id, result).await {
            log::error!(
                "Failed to persist node '{}' of execution {}: {}",
                node_id,
                self.execution.id,
                e
            );
        }
    }

    fn emit_node_finished(&self, node_id: &str, status: NodeStatus, error: Option<String>) {
        self.emit(ExecutionEvent::NodeFinished {
            execution_id: self.execution.id.clone(),
            node_id: node_id.to_string(),
            status: status.to_string(),
            error,
        });
    }

    fn emit(&self, event: ExecutionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}
