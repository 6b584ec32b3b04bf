// SPDX-License-Identifier: MIT

//! Execution persistence
//!
//! The coordinator is the only writer of a running execution; readers
//! (API, CLI, pollers) only ever see what has been written here.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::flow::engine::types::{Execution, NodeRunResult};
use crate::flow::Result;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution; fails with `StoreError::Duplicate` if the id exists
    async fn create(&self, execution: &Execution) -> Result<()>;

    /// Overwrite the execution header and every node result it carries
    async fn update(&self, execution: &Execution) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Execution>>;

    /// Executions of a workflow, most recently started first
    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>>;

    /// Insert or replace the result of one node
    async fn put_node_result(&self, execution_id: &str, result: &NodeRunResult) -> Result<()>;

    async fn find_by_idempotency_key(
        &self,
        workflow_id: &str,
        key: &str,
    ) -> Result<Option<Execution>>;

    /// Delete terminal executions that stopped before `before`; returns the count
    async fn prune(&self, before: DateTime<Utc>) -> Result<usize>;
}
