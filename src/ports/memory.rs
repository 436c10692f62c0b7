//! Memory port: opaque put/query against the external memory store
//!
//! The store owns the data; the engine passes [`MemoryId`] handles around.
//! Namespaces are colon-delimited scopes (`session:<id>`, `project:<slug>`,
//! `project:agent-<id>`, `global`).

use crate::error::Result;
use crate::types::{MemoryId, Namespace};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A memory to be stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub content: String,
    pub namespace: Namespace,

    /// Importance 1..=10 (10 = critical); out-of-range values are clamped
    pub importance: u8,

    pub summary: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl MemoryRecord {
    pub fn new(content: impl Into<String>, namespace: Namespace, importance: u8) -> Self {
        Self {
            content: content.into(),
            namespace,
            importance: importance.clamp(1, 10),
            summary: None,
            tags: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A stored memory as returned by queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMemory {
    pub id: MemoryId,
    pub record: MemoryRecord,
    pub created_at: DateTime<Utc>,
}

/// Port to the external memory store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemoryPort: Send + Sync {
    /// Store a memory, returning its handle.
    async fn store(&self, record: MemoryRecord) -> Result<MemoryId>;

    /// Query memories in a namespace, newest first, optionally filtered by
    /// tag overlap.
    async fn query(
        &self,
        namespace: Namespace,
        tags: Vec<String>,
        limit: usize,
    ) -> Result<Vec<StoredMemory>>;

    /// Fetch a single memory by handle.
    async fn get(&self, id: MemoryId) -> Result<Option<StoredMemory>>;
}

/// In-process memory store.
///
/// The production store lives outside the engine; this implementation backs
/// tests and standalone runs where no store is attached.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    memories: Arc<RwLock<HashMap<MemoryId, StoredMemory>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored memories (test observability).
    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memories.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryPort for InMemoryStore {
    async fn store(&self, mut record: MemoryRecord) -> Result<MemoryId> {
        record.importance = record.importance.clamp(1, 10);
        let id = MemoryId::new();
        let stored = StoredMemory {
            id,
            record,
            created_at: Utc::now(),
        };
        self.memories.write().await.insert(id, stored);
        Ok(id)
    }

    async fn query(
        &self,
        namespace: Namespace,
        tags: Vec<String>,
        limit: usize,
    ) -> Result<Vec<StoredMemory>> {
        let memories = self.memories.read().await;
        let mut matched: Vec<StoredMemory> = memories
            .values()
            .filter(|m| m.record.namespace == namespace)
            .filter(|m| {
                tags.is_empty() || tags.iter().any(|t| m.record.tags.contains(t))
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn get(&self, id: MemoryId) -> Result<Option<StoredMemory>> {
        Ok(self.memories.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_get() {
        let store = InMemoryStore::new();

        let record = MemoryRecord::new(
            "Checkpoint at 78% utilization",
            Namespace::ProjectAgent {
                agent_id: "orchestration".into(),
            },
            10,
        )
        .with_tags(vec!["checkpoint".into()]);

        let id = store.store(record).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.record.importance, 10);
        assert_eq!(
            fetched.record.namespace.to_string(),
            "project:agent-orchestration"
        );
    }

    #[tokio::test]
    async fn test_importance_clamped() {
        let store = InMemoryStore::new();
        let id = store
            .store(MemoryRecord {
                content: "x".into(),
                namespace: Namespace::Global,
                importance: 42,
                summary: None,
                tags: vec![],
            })
            .await
            .unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.record.importance, 10);
    }

    #[tokio::test]
    async fn test_query_filters_namespace_and_tags() {
        let store = InMemoryStore::new();
        let ns = Namespace::Project { slug: "demo".into() };

        store
            .store(MemoryRecord::new("a", ns.clone(), 5).with_tags(vec!["review".into()]))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new("b", ns.clone(), 5).with_tags(vec!["skill".into()]))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new("c", Namespace::Global, 5))
            .await
            .unwrap();

        let all = store.query(ns.clone(), vec![], 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let reviews = store
            .query(ns, vec!["review".into()], 10)
            .await
            .unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].record.content, "a");
    }
}
