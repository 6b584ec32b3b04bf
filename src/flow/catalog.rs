// SPDX-License-Identifier: MIT

//! Workflow catalog
//!
//! Owns workflow definitions. Every update stores a new version; a snapshot
//! handed out earlier is never mutated, so a running execution keeps the
//! definition it started with.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::flow::workflow::types::WorkflowDefinition;
use crate::flow::Result;
use crate::sdk::{FlowError, StoreError};

#[async_trait]
pub trait WorkflowCatalog: Send + Sync {
    async fn get(&self, id: &str) -> Result<Arc<WorkflowDefinition>>;

    async fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>>;

    /// Store a new definition; assigns an id when absent
    async fn create(&self, def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>>;

    /// Store `def` as the next version of `id`
    async fn update(&self, id: &str, def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Create from an arbitrary JSON document
    async fn import(&self, document: Value) -> Result<Arc<WorkflowDefinition>> {
        let def: WorkflowDefinition = serde_json::from_value(document)?;
        self.create(def).await
    }

    async fn export(&self, id: &str) -> Result<Value> {
        let def = self.get(id).await?;
        Ok(serde_json::to_value(def.as_ref())?)
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn new_workflow_id() -> String {
    format!("workflow_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl WorkflowCatalog for MemoryCatalog {
    async fn get(&self, id: &str) -> Result<Arc<WorkflowDefinition>> {
        let workflows = self.workflows.read().await;
        workflows
            .get(id)
            .cloned()
            .ok_or_else(|| FlowError::WorkflowNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>> {
        let workflows = self.workflows.read().await;
        let mut defs: Vec<_> = workflows.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.key().cmp(b.key())));
        Ok(defs)
    }

    async fn create(&self, mut def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let id = match def.id.take().filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => new_workflow_id(),
        };

        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("Workflow '{}'", id)).into());
        }

        let now = Utc::now();
        def.id = Some(id.clone());
        def.version = 1;
        def.created_at = Some(now);
        def.updated_at = Some(now);

        let def = Arc::new(def);
        workflows.insert(id.clone(), def.clone());
        log::info!("Created workflow '{}' ({})", def.name, id);
        Ok(def)
    }

    async fn update(&self, id: &str, mut def: WorkflowDefinition) -> Result<Arc<WorkflowDefinition>> {
        let mut workflows = self.workflows.write().await;
        let current = workflows
            .get(id)
            .ok_or_else(|| FlowError::WorkflowNotFound(id.to_string()))?;

        def.id = Some(id.to_string());
        def.version = current.version + 1;
        def.created_at = current.created_at;
        def.updated_at = Some(Utc::now());

        let def = Arc::new(def);
        workflows.insert(id.to_string(), def.clone());
        log::info!("Updated workflow '{}' to version {}", id, def.version);
        Ok(def)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        workflows
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| FlowError::WorkflowNotFound(id.to_string()))
    }
}
