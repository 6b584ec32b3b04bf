// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::ExecutionStore;
use crate::flow::engine::types::{Execution, NodeRunResult};
use crate::flow::Result;
use crate::sdk::{FlowError, StoreError};

/// In-process store; contents are lost when the process exits
#[derive(Default)]
pub struct MemoryStore {
    executions: RwLock<HashMap<String, (u64, Execution)>>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(StoreError::Duplicate(format!("Execution '{}'", execution.id)).into());
        }
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        executions.insert(execution.id.clone(), (seq, execution.clone()));
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some((_, stored)) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(FlowError::ExecutionNotFound(execution.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Execution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(id).map(|(_, e)| e.clone()))
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        let executions = self.executions.read().await;
        let mut matching: Vec<_> = executions
            .values()
            .filter(|(_, e)| e.workflow_id == workflow_id)
            .collect();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        Ok(matching.into_iter().map(|(_, e)| e.clone()).collect())
    }

    async fn put_node_result(&self, execution_id: &str, result: &NodeRunResult) -> Result<()> {
        let mut executions = self.executions.write().await;
        let (_, execution) = executions
            .get_mut(execution_id)
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))?;
        execution
            .node_results
            .insert(result.node_id.clone(), result.clone());
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        workflow_id: &str,
        key: &str,
    ) -> Result<Option<Execution>> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .map(|(_, e)| e)
            .find(|e| e.workflow_id == workflow_id && e.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut executions = self.executions.write().await;
        let initial = executions.len();
        executions.retain(|_, (_, e)| {
            !(e.is_terminal() && e.stopped_at.is_some_and(|stopped| stopped < before))
        });
        Ok(initial - executions.len())
    }
}
