//! Bounded in-memory cache of operation results (§4.4).
//!
//! The coordinator's RPC surface reports results as they happen; this store is a ring
//! buffer so a slow/offline node can be queried after the fact without the cache growing
//! without bound.

use crate::config::CoordinatorConfig;
use crate::types::{OperationResult, OperationType};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Storage backend for operation results, keyed by insertion order.
#[async_trait]
pub trait ResultStoreBackend: Send + Sync {
    /// Append a result, evicting the oldest entry if the store is at capacity.
    async fn append(&self, result: OperationResult);

    /// All results for `node_name`, most recent first.
    async fn by_node(&self, node_name: &str) -> Vec<OperationResult>;

    /// The most recent result for `node_name` and `operation_type`, if any.
    async fn latest(&self, node_name: &str, operation_type: OperationType) -> Option<OperationResult>;

    /// Number of results currently cached.
    async fn len(&self) -> usize;
}

/// Bounded FIFO result cache (§4.4 `MaxResultsToCache`).
pub struct ResultStore {
    results: RwLock<VecDeque<OperationResult>>,
    capacity: usize,
}

impl ResultStore {
    /// Construct a store bounded by `config.max_results_to_cache`.
    pub fn new(config: &CoordinatorConfig) -> Arc<Self> {
        Arc::new(Self {
            results: RwLock::new(VecDeque::with_capacity(config.max_results_to_cache.min(4096))),
            capacity: config.max_results_to_cache,
        })
    }

    /// Construct a store with an explicit capacity, for tests.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            results: RwLock::new(VecDeque::new()),
            capacity,
        })
    }

    /// Query results for `node_name`, optionally narrowed to one operation type, newest
    /// first (§4.4 "Query(node, operationType)").
    pub fn query(&self, node_name: &str, operation_type: Option<OperationType>) -> Vec<OperationResult> {
        self.results
            .read()
            .iter()
            .rev()
            .filter(|r| r.node_name == node_name)
            .filter(|r| operation_type.map_or(true, |t| r.operation_type == t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultStoreBackend for ResultStore {
    async fn append(&self, result: OperationResult) {
        let mut results = self.results.write();
        results.push_back(result);
        while results.len() > self.capacity {
            results.pop_front();
        }
    }

    async fn by_node(&self, node_name: &str) -> Vec<OperationResult> {
        self.query(node_name, None)
    }

    async fn latest(&self, node_name: &str, operation_type: OperationType) -> Option<OperationResult> {
        self.query(node_name, Some(operation_type)).into_iter().next()
    }

    async fn len(&self) -> usize {
        self.results.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationOutcome, OperationType};
    use std::time::SystemTime;

    fn result(node: &str, op: OperationType) -> OperationResult {
        OperationResult {
            node_name: node.to_string(),
            operation_time: SystemTime::now(),
            operation_start_time: SystemTime::now(),
            operation_type: op,
            operation_result: OperationOutcome::Succeeded,
            update_details: Vec::new(),
            windows_update_query: "IsInstalled=0".to_string(),
            windows_update_frequency: "Weekly".to_string(),
            reboot_required: false,
        }
    }

    #[tokio::test]
    async fn evicts_oldest_past_capacity() {
        let store = ResultStore::with_capacity(2);
        store.append(result("n1", OperationType::SearchAndDownload)).await;
        store.append(result("n2", OperationType::SearchAndDownload)).await;
        store.append(result("n3", OperationType::SearchAndDownload)).await;
        assert_eq!(store.len().await, 2);
        let nodes: Vec<_> = store.query("n1", None);
        assert!(nodes.is_empty(), "oldest entry should have been evicted");
    }

    #[tokio::test]
    async fn query_filters_by_operation_type() {
        let store = ResultStore::with_capacity(10);
        store.append(result("n1", OperationType::SearchAndDownload)).await;
        store.append(result("n1", OperationType::Installation)).await;
        let installs = store.query("n1", Some(OperationType::Installation));
        assert_eq!(installs.len(), 1);
        assert_eq!(installs[0].operation_type, OperationType::Installation);
    }

    #[tokio::test]
    async fn latest_returns_most_recent() {
        let store = ResultStore::with_capacity(10);
        store.append(result("n1", OperationType::SearchAndDownload)).await;
        store.append(result("n1", OperationType::SearchAndDownload)).await;
        assert!(store.latest("n1", OperationType::SearchAndDownload).await.is_some());
        assert!(store.latest("n2", OperationType::SearchAndDownload).await.is_none());
    }
}
