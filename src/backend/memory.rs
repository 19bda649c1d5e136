//! In-memory storage backend.
//!
//! Stands in for any of the three stores. Records are kept in a `DashMap`
//! keyed by id. Failures can be injected to exercise rollback paths.

use crate::backend::StorageBackend;
use crate::models::{IndexError, Result, StoreRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Injected failure behavior.
#[derive(Debug, Clone, Default)]
struct FailurePlan {
    /// Every write fails with this message
    writes: Option<String>,
    /// Number of upcoming writes that fail with a retryable error
    transient_writes: usize,
    /// Every delete fails with this message
    deletes: Option<String>,
}

/// DashMap-backed store.
pub struct InMemoryStore {
    name: String,
    records: DashMap<String, StoreRecord>,
    failures: Mutex<FailurePlan>,
    write_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: DashMap::new(),
            failures: Mutex::new(FailurePlan::default()),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, message: impl Into<String>) {
        self.with_failures(|plan| plan.writes = Some(message.into()));
    }

    /// Make the next `count` writes fail with a retryable error.
    pub fn fail_next_writes(&self, count: usize) {
        self.with_failures(|plan| plan.transient_writes = count);
    }

    /// Make every subsequent delete fail.
    pub fn fail_deletes(&self, message: impl Into<String>) {
        self.with_failures(|plan| plan.deletes = Some(message.into()));
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        self.with_failures(|plan| *plan = FailurePlan::default());
    }

    fn with_failures(&self, f: impl FnOnce(&mut FailurePlan)) {
        let mut plan = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut plan);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<StoreRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// All stored ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of `write` calls received, including failed ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageBackend for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, records: Vec<StoreRecord>) -> Result<Vec<String>> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);

        {
            let mut plan = self
                .failures
                .lock()
                .map_err(|_| IndexError::Internal("failure plan lock poisoned".to_string()))?;
            if let Some(message) = &plan.writes {
                return Err(IndexError::backend(&self.name, message));
            }
            if plan.transient_writes > 0 {
                plan.transient_writes -= 1;
                return Err(IndexError::transient(&self.name, "temporarily unavailable"));
            }
        }

        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        for record in records {
            self.records.insert(record.id().to_string(), record);
        }

        debug!(store = %self.name, count = ids.len(), "Records written");
        Ok(ids)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        {
            let plan = self
                .failures
                .lock()
                .map_err(|_| IndexError::Internal("failure plan lock poisoned".to_string()))?;
            if let Some(message) = &plan.deletes {
                return Err(IndexError::backend(&self.name, message));
            }
        }

        let removed = ids
            .iter()
            .filter(|id| self.records.remove(id.as_str()).is_some())
            .count();
        debug!(store = %self.name, requested = ids.len(), removed, "Records deleted");
        Ok(())
    }

    async fn count(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_record(id: &str) -> StoreRecord {
        StoreRecord::Document {
            id: id.to_string(),
            doc_id: "doc".to_string(),
            content: "text".to_string(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_write_and_delete() {
        let store = InMemoryStore::new("document_store");
        let ids = store
            .write(vec![doc_record("a"), doc_record("b")])
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.len(), 2);

        store.delete(&["a".to_string(), "zzz".to_string()]).await.unwrap();
        assert_eq!(store.ids(), vec!["b"]);
        assert_eq!(store.count().await, Some(1));
    }

    #[tokio::test]
    async fn test_failed_write_stores_nothing() {
        let store = InMemoryStore::new("vector_store");
        store.fail_writes("connection refused");

        let err = store.write(vec![doc_record("a")]).await.unwrap_err();
        assert_eq!(err.to_string(), "Backend error in vector_store: connection refused");
        assert!(!err.is_retryable());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let store = InMemoryStore::new("graph_store");
        store.fail_next_writes(2);

        assert!(store.write(vec![doc_record("a")]).await.unwrap_err().is_retryable());
        assert!(store.write(vec![doc_record("a")]).await.is_err());
        assert!(store.write(vec![doc_record("a")]).await.is_ok());
        assert_eq!(store.write_calls(), 3);
        assert!(store.contains("a"));
    }

    #[tokio::test]
    async fn test_heal_clears_failures() {
        let store = InMemoryStore::new("document_store");
        store.fail_deletes("read only");
        assert!(store.delete(&["a".to_string()]).await.is_err());
        store.heal();
        assert!(store.delete(&["a".to_string()]).await.is_ok());
    }
}
