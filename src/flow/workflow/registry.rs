// SPDX-License-Identifier: MIT

use crate::sdk::{NodeExecutor, NodeTypeDescriptor};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared table of node executors keyed by node type
#[derive(Clone)]
pub struct NodeTypeRegistry {
    executors: Arc<RwLock<HashMap<String, Arc<dyn NodeExecutor>>>>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self {
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, executor: Arc<dyn NodeExecutor>) {
        let mut executors = self.executors.write().await;
        log::debug!("Registered node type: {}", executor.node_type());
        executors.insert(executor.node_type().to_string(), executor);
    }

    pub async fn resolve(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        let executors = self.executors.read().await;
        executors.get(node_type).cloned()
    }

    /// Freeze the current table; validation and each run use a snapshot
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let executors = self.executors.read().await;
        RegistrySnapshot {
            executors: executors.clone(),
        }
    }

    /// Descriptors of every registered type, grouped by `group`
    pub async fn describe(&self) -> BTreeMap<String, BTreeMap<String, NodeTypeDescriptor>> {
        self.snapshot().await.describe()
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of the registry
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl RegistrySnapshot {
    pub fn resolve(&self, node_type: &str) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn describe(&self) -> BTreeMap<String, BTreeMap<String, NodeTypeDescriptor>> {
        let mut groups: BTreeMap<String, BTreeMap<String, NodeTypeDescriptor>> = BTreeMap::new();
        for executor in self.executors.values() {
            let desc = executor.describe();
            groups
                .entry(desc.group.clone())
                .or_default()
                .insert(desc.name.clone(), desc);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{NodeContext, NodeError, NodeOutput};
    use async_trait::async_trait;
    use serde_json::json;

    /// A mock node type for testing
    struct MockNode {
        node_type: String,
        group: String,
    }

    impl MockNode {
        fn new(node_type: &str) -> Self {
            Self {
                node_type: node_type.to_string(),
                group: "core".to_string(),
            }
        }

        fn in_group(node_type: &str, group: &str) -> Self {
            Self {
                node_type: node_type.to_string(),
                group: group.to_string(),
            }
        }
    }

    #[async_trait]
    impl NodeExecutor for MockNode {
        fn node_type(&self) -> &str {
            &self.node_type
        }

        fn description(&self) -> &str {
            "Mock node"
        }

        fn group(&self) -> &str {
            &self.group
        }

        async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::main(json!({"result": "mock"})))
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = NodeTypeRegistry::new();
        registry.register(Arc::new(MockNode::new("set"))).await;

        let resolved = registry.resolve("set").await;
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().node_type(), "set");
        assert!(registry.resolve("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let registry = NodeTypeRegistry::new();
        registry.register(Arc::new(MockNode::new("a"))).await;

        let snapshot = registry.snapshot().await;
        registry.register(Arc::new(MockNode::new("b"))).await;

        assert!(snapshot.contains("a"));
        assert!(!snapshot.contains("b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_is_clone() {
        let registry = NodeTypeRegistry::new();
        let cloned = registry.clone();

        cloned.register(Arc::new(MockNode::new("shared"))).await;
        assert!(registry.resolve("shared").await.is_some());
    }

    #[tokio::test]
    async fn test_describe_groups_types() {
        let registry = NodeTypeRegistry::new();
        registry.register(Arc::new(MockNode::new("set"))).await;
        registry
            .register(Arc::new(MockNode::in_group("mcp-tool", "integrations")))
            .await;

        let groups = registry.describe().await;
        assert_eq!(groups.len(), 2);
        assert!(groups["core"].contains_key("set"));
        assert_eq!(groups["integrations"]["mcp-tool"].description, "Mock node");
    }
}
