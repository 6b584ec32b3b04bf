//! Integration tests for workflow planning and execution
//!
//! These tests drive the public engine API end to end using mock node types.

use async_trait::async_trait;
use nodeflow::flow::catalog::{MemoryCatalog, WorkflowCatalog};
use nodeflow::flow::config::EngineConfig;
use nodeflow::flow::engine::{Engine, ExecutionStatus, NodeStatus};
use nodeflow::flow::mcp::McpServiceManager;
use nodeflow::flow::nodes;
use nodeflow::flow::store::{ExecutionStore, MemoryStore, SqliteStore};
use nodeflow::flow::workflow::graph::plan;
use nodeflow::flow::workflow::loader::WorkflowLoader;
use nodeflow::flow::workflow::registry::NodeTypeRegistry;
use nodeflow::flow::workflow::types::{Edge, Node, WorkflowDefinition};
use nodeflow::sdk::{
    ExecutionEvent, FlowError, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Mock Components
// ============================================================================

/// Returns a fixed list of records, as an HTTP fetch would
struct FetchNode;

#[async_trait]
impl NodeExecutor for FetchNode {
    fn node_type(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch records"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let source = ctx.main_input()["source"].as_str().unwrap_or("default");
        Ok(NodeOutput::main(json!({
            "source": source,
            "items": [{"n": 1}, {"n": 2}, {"n": 3}]
        })))
    }
}

/// Counts the records it receives
struct TransformNode;

#[async_trait]
impl NodeExecutor for TransformNode {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn description(&self) -> &str {
        "Summarize records"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = ctx.main_input()["items"]
            .as_array()
            .ok_or_else(|| NodeError::invalid_input("expected items"))?;
        let total: i64 = items.iter().filter_map(|i| i["n"].as_i64()).sum();
        Ok(NodeOutput::main(json!({"count": items.len(), "total": total})))
    }
}

async fn engine_with(store: Arc<dyn ExecutionStore>) -> Arc<Engine> {
    let registry = NodeTypeRegistry::new();
    nodes::register_builtins(&registry, Arc::new(McpServiceManager::default())).await;
    registry.register(Arc::new(FetchNode)).await;
    registry.register(Arc::new(TransformNode)).await;
    Engine::new(
        EngineConfig::default(),
        registry,
        Arc::new(MemoryCatalog::new()),
        store,
    )
}

async fn engine() -> Arc<Engine> {
    engine_with(Arc::new(MemoryStore::new())).await
}

async fn add_workflow(engine: &Engine, mut def: WorkflowDefinition, id: &str) -> String {
    def.id = Some(id.to_string());
    engine.catalog().create(def).await.unwrap();
    id.to_string()
}

fn fetch_pipeline() -> WorkflowDefinition {
    WorkflowDefinition::new("Fetch pipeline")
        .with_node(Node::new("trigger", "trigger"))
        .with_node(Node::new("fetch", "fetch"))
        .with_node(Node::new("transform", "transform"))
        .with_edge(Edge::new("e1", "trigger", "fetch"))
        .with_edge(Edge::new("e2", "fetch", "transform"))
}

/// Deterministic pseudo-random sequence for generated graphs
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

// ============================================================================
// Planning
// ============================================================================

#[test]
fn test_plan_is_topologically_valid() {
    for seed in 0..25u64 {
        let mut rng = Lcg(seed);
        let count = 3 + (rng.next() % 8) as usize;
        // Ids run against creation order so the id tie-break is not the answer
        let ids: Vec<String> = (0..count).map(|i| format!("n{:02}", count - i)).collect();

        let mut def = WorkflowDefinition::new(format!("generated-{}", seed));
        for id in &ids {
            def = def.with_node(Node::new(id.as_str(), "merge"));
        }
        let mut edges = Vec::new();
        for i in 0..count {
            for j in (i + 1)..count {
                if rng.next() % 3 == 0 {
                    edges.push((ids[i].clone(), ids[j].clone()));
                    def = def.with_edge(Edge::new(
                        format!("e{}-{}", i, j),
                        ids[i].as_str(),
                        ids[j].as_str(),
                    ));
                }
            }
        }

        let plan = plan(&def).unwrap();
        assert_eq!(plan.len(), count, "seed {}", seed);
        let position: HashMap<&str, usize> = plan
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for (source, target) in &edges {
            assert!(
                position[source.as_str()] < position[target.as_str()],
                "seed {}: {} must precede {}",
                seed,
                source,
                target
            );
        }
    }
}

#[test]
fn test_two_node_cycle() {
    let def = WorkflowDefinition::new("loop")
        .with_node(Node::new("a", "merge"))
        .with_node(Node::new("b", "merge"))
        .with_edge(Edge::new("ab", "a", "b"))
        .with_edge(Edge::new("ba", "b", "a"));

    match plan(&def) {
        Err(FlowError::Cycle(err)) => assert_eq!(err.cycle, vec!["a", "b"]),
        other => panic!("expected cycle error, got {:?}", other.map(|p| p.order)),
    }
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_fetch_transform_pipeline() {
    let engine = engine().await;
    let id = add_workflow(&engine, fetch_pipeline(), "pipeline").await;

    let execution_id = engine
        .start_run(&id, json!({"source": "crm"}), None)
        .await
        .unwrap();
    let execution = engine.wait_for(&execution_id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.node_results.len(), 3);
    for node in ["trigger", "fetch", "transform"] {
        assert_eq!(execution.node_status(node), Some(NodeStatus::Success), "{}", node);
    }

    let fetched = &execution.data["fetch"]["main"];
    assert_eq!(fetched["source"], "crm");
    assert_eq!(execution.node("transform").unwrap().input["main"], *fetched);
    assert_eq!(
        execution.data["transform"]["main"],
        json!({"count": 3, "total": 6})
    );
    assert!(execution.stopped_at.is_some());
}

#[tokio::test]
async fn test_independent_branch_survives_failure() {
    let engine = engine().await;
    let def = WorkflowDefinition::new("branches")
        .with_node(Node::new("x", "fail").with_data(json!({"message": "boom"})))
        .with_node(Node::new("y", "set").with_data(json!({"values": {"ok": true}})))
        .with_node(Node::new("p", "trigger"))
        .with_node(Node::new("q", "set").with_data(json!({"values": {"ok": true}})))
        .with_edge(Edge::new("xy", "x", "y"))
        .with_edge(Edge::new("pq", "p", "q"));
    let id = add_workflow(&engine, def, "branches").await;

    let execution_id = engine.start_run(&id, json!({}), None).await.unwrap();
    let execution = engine.wait_for(&execution_id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Error);
    assert_eq!(execution.node_status("x"), Some(NodeStatus::Error));
    assert_eq!(execution.node_status("y"), Some(NodeStatus::Skipped));
    assert_eq!(execution.node_status("p"), Some(NodeStatus::Success));
    assert_eq!(execution.node_status("q"), Some(NodeStatus::Success));
    assert_eq!(execution.error.as_deref(), Some("Node 'x' failed: boom"));
    assert!(execution.node("y").unwrap().started_at.is_none());
}

#[tokio::test]
async fn test_transitive_dependents_are_skipped() {
    let engine = engine().await;
    let def = WorkflowDefinition::new("chain")
        .with_node(Node::new("a", "fail"))
        .with_node(Node::new("b", "merge"))
        .with_node(Node::new("c", "merge"))
        .with_edge(Edge::new("ab", "a", "b"))
        .with_edge(Edge::new("bc", "b", "c"));
    let id = add_workflow(&engine, def, "chain").await;

    let execution_id = engine.start_run(&id, json!({}), None).await.unwrap();
    let execution = engine.wait_for(&execution_id).await.unwrap();

    assert_eq!(execution.node_status("b"), Some(NodeStatus::Skipped));
    assert_eq!(execution.node_status("c"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn test_idempotent_start() {
    let engine = engine().await;
    let id = add_workflow(&engine, fetch_pipeline(), "pipeline").await;

    let first = engine
        .start_run(&id, json!({}), Some("order-42".to_string()))
        .await
        .unwrap();
    let second = engine
        .start_run(&id, json!({}), Some("order-42".to_string()))
        .await
        .unwrap();
    assert_eq!(first, second);

    engine.wait_for(&first).await.unwrap();
    let third = engine
        .start_run(&id, json!({}), Some("order-42".to_string()))
        .await
        .unwrap();
    assert_eq!(first, third);

    let other = engine
        .start_run(&id, json!({}), Some("order-43".to_string()))
        .await
        .unwrap();
    assert_ne!(first, other);
    engine.wait_for(&other).await.unwrap();

    assert_eq!(engine.list_executions(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_idempotent_starts() {
    let engine = engine().await;
    let id = add_workflow(&engine, fetch_pipeline(), "pipeline").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .start_run(&id, json!({}), Some("burst".to_string()))
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn test_cancel_leaves_waiting_nodes_unstarted() {
    let engine = engine().await;
    let def = WorkflowDefinition::new("slow")
        .with_node(Node::new("start", "trigger"))
        .with_node(Node::new("pause", "wait").with_data(json!({"millis": 60_000})))
        .with_node(Node::new("after", "set").with_data(json!({"values": {"done": true}})))
        .with_edge(Edge::new("e1", "start", "pause"))
        .with_edge(Edge::new("e2", "pause", "after"));
    let id = add_workflow(&engine, def, "slow").await;

    let mut events = engine.subscribe();
    let execution_id = engine.start_run(&id, json!({}), None).await.unwrap();

    // Cancel once the wait node is in flight
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ExecutionEvent::NodeStarted { node_id, .. } if node_id == "pause" => break,
            _ => {}
        }
    }
    engine.cancel_run(&execution_id).await.unwrap();

    let execution = tokio::time::timeout(Duration::from_secs(5), engine.wait_for(&execution_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.node_status("start"), Some(NodeStatus::Success));
    assert_eq!(execution.node_status("after"), Some(NodeStatus::Waiting));
    assert!(execution.node("after").unwrap().started_at.is_none());

    // Nothing downstream ever started
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeStarted { node_id, .. } = event {
            assert_ne!(node_id, "after");
        }
    }

    // Canceling a finished run is a no-op
    engine.cancel_run(&execution_id).await.unwrap();
    let again = engine.get_execution(&execution_id).await.unwrap();
    assert_eq!(again.status, ExecutionStatus::Canceled);
}

#[tokio::test]
async fn test_cycle_is_rejected_and_recorded() {
    let engine = engine().await;
    let def = WorkflowDefinition::new("loop")
        .with_node(Node::new("a", "merge"))
        .with_node(Node::new("b", "merge"))
        .with_edge(Edge::new("ab", "a", "b"))
        .with_edge(Edge::new("ba", "b", "a"));
    let id = add_workflow(&engine, def, "loop").await;

    let err = engine.start_run(&id, json!({}), None).await.unwrap_err();
    assert!(matches!(err, FlowError::Cycle(_)));

    let history = engine.list_executions(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Error);
    assert!(history[0].node_results.is_empty());
}

#[tokio::test]
async fn test_running_snapshot_ignores_later_edits() {
    let engine = engine().await;
    let def = WorkflowDefinition::new("edited")
        .with_node(Node::new("start", "trigger"))
        .with_node(Node::new("pause", "wait").with_data(json!({"millis": 100})))
        .with_edge(Edge::new("e1", "start", "pause"));
    let id = add_workflow(&engine, def, "edited").await;

    let execution_id = engine.start_run(&id, json!({}), None).await.unwrap();
    engine
        .catalog()
        .update(
            &id,
            WorkflowDefinition::new("edited").with_node(Node::new("only", "trigger")),
        )
        .await
        .unwrap();

    let execution = engine.wait_for(&execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.workflow_version, 1);
    assert!(execution.node("pause").is_some());
    assert!(execution.node("only").is_none());
}

#[tokio::test]
async fn test_yaml_workflow_on_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let workflow_path = dir.path().join("pipeline.yaml");
    std::fs::write(
        &workflow_path,
        r#"
id: yaml-pipeline
name: YAML pipeline
nodes:
  - id: trigger
    type: trigger
  - id: fetch
    type: fetch
  - id: transform
    type: transform
connections:
  - id: e1
    source: trigger
    target: fetch
  - id: e2
    source: fetch
    target: transform
"#,
    )
    .unwrap();

    let db_path = dir.path().join("executions.db");
    let execution_id = {
        let engine = engine_with(Arc::new(SqliteStore::open(&db_path).unwrap())).await;
        let def = WorkflowLoader::new().load_workflow(&workflow_path).unwrap();
        let execution_id = engine
            .start_definition(Arc::new(def), json!({}), None)
            .await
            .unwrap();
        engine.wait_for(&execution_id).await.unwrap();
        execution_id
    };

    let store = SqliteStore::open(&db_path).unwrap();
    let execution = store.get(&execution_id).await.unwrap().unwrap();
    assert_eq!(execution.workflow_id, "yaml-pipeline");
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(
        execution.node("transform").unwrap().output["main"]["count"],
        json!(3)
    );
}

#[tokio::test]
async fn test_error_workflow_receives_failure() {
    let engine = engine().await;
    let handler = WorkflowDefinition::new("on-error")
        .with_node(Node::new("start", "trigger"))
        .with_node(Node::new("note", "set").with_data(json!({"values": {}, "keepInput": true})))
        .with_edge(Edge::new("e1", "start", "note"));
    add_workflow(&engine, handler, "on-error").await;

    let mut failing = WorkflowDefinition::new("failing")
        .with_node(Node::new("explode", "fail").with_data(json!({"message": "disk full"})));
    failing.settings.error_workflow = Some("on-error".to_string());
    let id = add_workflow(&engine, failing, "failing").await;

    let execution_id = engine
        .start_run(&id, json!({"job": 7}), None)
        .await
        .unwrap();
    engine.wait_for(&execution_id).await.unwrap();

    let mut handled = Vec::new();
    for _ in 0..100 {
        handled = engine.list_executions("on-error").await.unwrap();
        if handled.first().map(|e| e.is_terminal()).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(handled.len(), 1);
    let report: &Value = &handled[0].data["note"]["main"];
    assert_eq!(report["error"]["executionId"], json!(execution_id));
    assert_eq!(report["error"]["nodeId"], "explode");
    assert_eq!(report["trigger"], json!({"job": 7}));
}
