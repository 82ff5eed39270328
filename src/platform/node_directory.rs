//! Cluster membership view (§2, §3 "Node: external").

use crate::error::Result;
use crate::types::Node;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// The platform's view of cluster membership.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// All nodes currently known to the platform.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// A single node by name, if it exists.
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;
}

/// In-memory reference implementation of [`NodeDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryNodeDirectory {
    nodes: DashMap<String, Node>,
}

impl InMemoryNodeDirectory {
    /// Construct a directory from an initial node list.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Arc<Self> {
        let map = DashMap::new();
        for node in nodes {
            map.insert(node.name.clone(), node);
        }
        Arc::new(Self { nodes: map })
    }

    /// Add or replace a node.
    pub fn upsert(&self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Remove a node, e.g. to simulate it being decommissioned (orphan scenario, §8e).
    pub fn remove(&self, name: &str) {
        self.nodes.remove(name);
    }
}

#[async_trait]
impl NodeDirectory for InMemoryNodeDirectory {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(name).map(|e| e.value().clone()))
    }
}
