// SPDX-License-Identifier: MIT

//! Engine facade
//!
//! `Engine` ties the catalog, registry, store and coordinator together and
//! is the surface used by the HTTP server and the CLI.

pub mod coordinator;
pub mod invoke;
pub mod types;

pub use types::{Execution, ExecutionStatus, NodeRunResult, NodeStatus};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use self::coordinator::{Coordinator, RunOutcome};
use crate::flow::catalog::{MemoryCatalog, WorkflowCatalog};
use crate::flow::config::EngineConfig;
use crate::flow::mcp::{McpServiceManager, ToolCaller};
use crate::flow::nodes;
use crate::flow::store::{ExecutionStore, MemoryStore, SqliteStore};
use crate::flow::workflow::graph::{self, ExecutionPlan};
use crate::flow::workflow::loader::WorkflowLoader;
use crate::flow::workflow::registry::{NodeTypeRegistry, RegistrySnapshot};
use crate::flow::workflow::types::WorkflowDefinition;
use crate::flow::workflow::validate::{self, ValidationResult};
use crate::flow::Result;
use crate::sdk::{ExecutionEvent, FlowError};

const EVENT_CAPACITY: usize = 1024;

/// Handle on a run whose coordinator is still alive
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Request to start a workflow's error workflow after a failed run
#[derive(Debug)]
struct ErrorWorkflowRequest {
    error_workflow: String,
    trigger_data: Value,
}

pub struct Engine {
    config: Arc<EngineConfig>,
    registry: NodeTypeRegistry,
    catalog: Arc<dyn WorkflowCatalog>,
    store: Arc<dyn ExecutionStore>,
    tools: Arc<dyn ToolCaller>,
    events: broadcast::Sender<ExecutionEvent>,
    active: Arc<RwLock<HashMap<String, ActiveRun>>>,
    start_lock: Mutex<()>,
    error_tx: mpsc::UnboundedSender<ErrorWorkflowRequest>,
}

impl Engine {
    /// Create an engine without MCP servers; must be called inside a tokio runtime
    pub fn new(
        config: EngineConfig,
        registry: NodeTypeRegistry,
        catalog: Arc<dyn WorkflowCatalog>,
        store: Arc<dyn ExecutionStore>,
    ) -> Arc<Self> {
        let tools = Arc::new(McpServiceManager::default());
        Self::with_tools(config, registry, catalog, store, tools)
    }

    /// Create an engine whose MCP API is served by `tools`
    pub fn with_tools(
        config: EngineConfig,
        registry: NodeTypeRegistry,
        catalog: Arc<dyn WorkflowCatalog>,
        store: Arc<dyn ExecutionStore>,
        tools: Arc<dyn ToolCaller>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            config: Arc::new(config),
            registry,
            catalog,
            store,
            tools,
            events,
            active: Arc::new(RwLock::new(HashMap::new())),
            start_lock: Mutex::new(()),
            error_tx,
        });
        tokio::spawn(dispatch_error_workflows(Arc::downgrade(&engine), error_rx));
        engine
    }

    /// Build the engine described by `config`: built-in node types, the
    /// configured store, and definitions from `workflows_dir`.
    pub async fn from_config(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let registry = NodeTypeRegistry::new();
        let tools: Arc<dyn ToolCaller> =
            Arc::new(McpServiceManager::new(config.mcp_servers.clone()));
        nodes::register_builtins(&registry, tools.clone()).await;

        let store: Arc<dyn ExecutionStore> = match &config.database {
            Some(path) => {
                log::info!("Using SQLite execution store at {}", path.display());
                Arc::new(SqliteStore::open(path)?)
            }
            None => Arc::new(MemoryStore::new()),
        };

        let catalog = Arc::new(MemoryCatalog::new());
        if let Some(dir) = &config.workflows_dir {
            for def in WorkflowLoader::new().load_dir(dir)? {
                let created = catalog.create(def).await?;
                log::info!("Loaded workflow '{}'", created.key());
            }
        }

        Ok(Self::with_tools(config, registry, catalog, store, tools))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<dyn WorkflowCatalog> {
        &self.catalog
    }

    /// MCP servers shared with `mcp-tool` nodes
    pub fn tools(&self) -> &Arc<dyn ToolCaller> {
        &self.tools
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub async fn validate(&self, def: &WorkflowDefinition) -> ValidationResult {
        let types = self.registry.snapshot().await;
        validate::validate(def, &types)
    }

    pub fn plan(&self, def: &WorkflowDefinition) -> Result<ExecutionPlan> {
        graph::plan(def)
    }

    /// Start a run of a catalog workflow; returns the execution id.
    ///
    /// A repeated call with the same idempotency key for the same workflow
    /// returns the first execution's id without starting anything.
    pub async fn start_run(
        &self,
        workflow_id: &str,
        trigger_data: Value,
        idempotency_key: Option<String>,
    ) -> Result<String> {
        let def = self.catalog.get(workflow_id).await?;
        self.start_definition(def, trigger_data, idempotency_key)
            .await
    }

    /// Start a run of a definition that need not be in the catalog
    pub async fn start_definition(
        &self,
        def: Arc<WorkflowDefinition>,
        trigger_data: Value,
        idempotency_key: Option<String>,
    ) -> Result<String> {
        let types = self.registry.snapshot().await;
        let start_guard = match &idempotency_key {
            Some(key) => {
                let guard = self.start_lock.lock().await;
                if let Some(existing) = self
                    .store
                    .find_by_idempotency_key(def.key(), key)
                    .await?
                {
                    log::info!(
                        "Idempotency key '{}' already used by execution {}",
                        key,
                        existing.id
                    );
                    if is_rejected(&existing) {
                        // The caller sees the same rejection as the first attempt
                        self.prepare(&def, &types)?;
                        return Err(FlowError::planning(existing.error.unwrap_or_default()));
                    }
                    return Ok(existing.id);
                }
                Some(guard)
            }
            None => None,
        };

        let mut execution = Execution::new(def.key(), def.version, trigger_data)
            .with_idempotency_key(idempotency_key);

        let plan = match self.prepare(&def, &types) {
            Ok(plan) => plan,
            Err(err) => {
                log::error!("Cannot run workflow '{}': {}", def.key(), err);
                execution.transition(ExecutionStatus::Error);
                execution.error = Some(err.to_string());
                self.store.create(&execution).await?;
                let _ = self.events.send(ExecutionEvent::RunFinished {
                    execution_id: execution.id.clone(),
                    status: execution.status.to_string(),
                    error: execution.error.clone(),
                });
                return Err(err);
            }
        };

        for node_id in &plan.order {
            execution
                .node_results
                .insert(node_id.clone(), NodeRunResult::waiting(node_id.as_str()));
        }
        execution.transition(ExecutionStatus::Running);
        self.store.create(&execution).await?;
        drop(start_guard);

        let execution_id = execution.id.clone();
        log::info!(
            "Execution {} of workflow '{}' v{} started",
            execution_id,
            def.key(),
            def.version
        );
        let _ = self.events.send(ExecutionEvent::RunStarted {
            execution_id: execution_id.clone(),
            workflow_id: execution.workflow_id.clone(),
        });

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.active.write().await.insert(
            execution_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let coordinator = Coordinator::new(
            def.clone(),
            plan,
            types,
            execution,
            self.store.clone(),
            self.events.clone(),
            cancel,
            self.config.clone(),
        );
        let active = self.active.clone();
        let error_tx = self.error_tx.clone();
        tokio::spawn(async move {
            let outcome = coordinator.run().await;
            if let Some(request) = error_workflow_request(&def, &outcome) {
                if error_tx.send(request).is_err() {
                    log::warn!("Engine shut down before the error workflow could start");
                }
            }
            let _ = done_tx.send(true);
            active.write().await.remove(&outcome.execution.id);
        });

        Ok(execution_id)
    }

    /// Validate and plan a definition against a frozen set of node types
    fn prepare(&self, def: &WorkflowDefinition, types: &RegistrySnapshot) -> Result<ExecutionPlan> {
        let warnings = validate::validate(def, types).into_result()?;
        for warning in warnings {
            log::warn!("Workflow '{}': {}", def.key(), warning);
        }
        graph::plan(def)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        self.store
            .get(execution_id)
            .await?
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Request cancellation; a no-op for terminal executions
    pub async fn cancel_run(&self, execution_id: &str) -> Result<()> {
        if let Some(run) = self.active.read().await.get(execution_id) {
            log::info!("Cancel requested for execution {}", execution_id);
            run.cancel.cancel();
            return Ok(());
        }

        let execution = self.get_execution(execution_id).await?;
        log::debug!(
            "Cancel of execution {} ignored, run is {}",
            execution_id,
            execution.status
        );
        Ok(())
    }

    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        self.store.list(workflow_id).await
    }

    /// Wait until the run is terminal and return its final record
    pub async fn wait_for(&self, execution_id: &str) -> Result<Execution> {
        let done = self
            .active
            .read()
            .await
            .get(execution_id)
            .map(|run| run.done.clone());
        if let Some(mut done) = done {
            // A closed channel means the coordinator is gone; the store is final
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_execution(execution_id).await
    }

    /// Delete terminal executions that stopped before `before`
    pub async fn prune_executions(&self, before: DateTime<Utc>) -> Result<usize> {
        self.store.prune(before).await
    }

    /// Apply `retention.max_age_days`; does nothing when unset
    pub async fn prune_expired(&self) -> Result<usize> {
        match self.config.retention.max_age_days {
            Some(days) => {
                let cutoff = Utc::now() - chrono::Duration::days(days as i64);
                self.prune_executions(cutoff).await
            }
            None => Ok(0),
        }
    }
}

/// An execution that was refused before any node ran
fn is_rejected(execution: &Execution) -> bool {
    execution.status == ExecutionStatus::Error && execution.node_results.is_empty()
}

fn error_workflow_request(
    def: &WorkflowDefinition,
    outcome: &RunOutcome,
) -> Option<ErrorWorkflowRequest> {
    let execution = &outcome.execution;
    if execution.status != ExecutionStatus::Error {
        return None;
    }
    let error_workflow = def.settings.error_workflow.clone()?;
    if error_workflow == execution.workflow_id {
        log::warn!(
            "Workflow '{}' names itself as its error workflow, not triggering",
            error_workflow
        );
        return None;
    }

    Some(ErrorWorkflowRequest {
        error_workflow,
        trigger_data: json!({
            "error": {
                "message": execution.error,
                "executionId": execution.id,
                "workflowId": execution.workflow_id,
                "nodeId": outcome.failed_node,
                "startedAt": execution.started_at,
                "stoppedAt": execution.stopped_at,
            },
            "trigger": execution.trigger_data,
        }),
    })
}

/// Starts error workflows without the failed run awaiting them
async fn dispatch_error_workflows(
    engine: Weak<Engine>,
    mut requests: mpsc::UnboundedReceiver<ErrorWorkflowRequest>,
) {
    while let Some(request) = requests.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match engine
            .start_run(&request.error_workflow, request.trigger_data, None)
            .await
        {
            Ok(execution_id) => log::info!(
                "Error workflow '{}' started as execution {}",
                request.error_workflow,
                execution_id
            ),
            Err(e) => log::error!(
                "Error workflow '{}' could not start: {}",
                request.error_workflow,
                e
            ),
        }
    }
}
