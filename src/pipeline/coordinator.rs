//! Pipeline coordinator: runs one document through every stage inside a single
//! transaction.
//!
//! Stage order:
//! preprocess → chunk → extract_metadata → embed → write_document_store →
//! write_vector_store → write_graph_store
//!
//! Any stage failure rolls the transaction back. Expected failures come back as
//! an unsuccessful `TransactionResult`; only setup errors are returned as `Err`.

use crate::backend::{
    extractors_from_config, Chunker, DefaultPreprocessor, Embedder, HashEmbedder,
    MetadataExtractor, Preprocessor, SentenceChunker, StoreSet,
};
use crate::models::{Chunk, Config, Document, IndexError, Result, StageConfig, TransactionResult};
use crate::pipeline::stages::{
    document_records, graph_triplets, vector_records, with_retry, StageRunner, StageTracker,
};
use crate::transaction::{
    CompensationRecord, OperationKind, RollbackRegistry, TransactionJournal, TransactionManager,
    TransactionStatus, TransactionSummary,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Record counts per store plus transaction statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStats {
    /// Records held by each store, when the store can report it
    pub stores: BTreeMap<String, Option<usize>>,
    pub transactions: TransactionSummary,
}

/// Holds a subject's lock and drops the map entry once nobody else wants it,
/// also when the run unwinds.
struct SubjectLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    subject_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SubjectLock<'_> {
    fn drop(&mut self) {
        // The guard holds a reference to the mutex; release it first.
        self.guard.take();
        self.locks
            .remove_if(&self.subject_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Indexes documents into the document, vector and graph stores.
pub struct PipelineCoordinator {
    manager: Arc<TransactionManager>,
    stores: StoreSet,
    preprocessor: Arc<dyn Preprocessor>,
    chunker: Arc<dyn Chunker>,
    extractors: Vec<Arc<dyn MetadataExtractor>>,
    embedder: Arc<dyn Embedder>,
    policy: StageConfig,
    /// One lock per document id being indexed
    subject_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PipelineCoordinator {
    /// Create a coordinator with the reference collaborators configured by
    /// `config`.
    pub fn new(manager: Arc<TransactionManager>, stores: StoreSet, config: &Config) -> Result<Self> {
        config.validate()?;

        for kind in manager.registry().missing_compensations() {
            warn!(kind = %kind, "No compensation registered; writes of this kind cannot be undone");
        }

        Ok(Self {
            manager,
            stores,
            preprocessor: Arc::new(DefaultPreprocessor::new()?),
            chunker: Arc::new(SentenceChunker::new(
                config.pipeline.chunk_size,
                config.pipeline.chunk_overlap,
            )?),
            extractors: extractors_from_config(&config.pipeline)?,
            embedder: Arc::new(HashEmbedder::new(config.pipeline.embedding_dimension)?),
            policy: config.stages.clone(),
            subject_locks: DashMap::new(),
        })
    }

    /// Build the standard setup: store-backed compensations, a manager
    /// (journaling when configured) and the reference collaborators.
    pub fn from_config(config: &Config, stores: StoreSet) -> Result<Self> {
        let registry = RollbackRegistry::for_backends(&stores)?;
        let mut manager = TransactionManager::new(Arc::new(registry));
        if let Some(path) = config.journal.resolved_path() {
            manager = manager.with_journal(TransactionJournal::open(&path)?);
        }
        Self::new(Arc::new(manager), stores, config)
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_extractors(mut self, extractors: Vec<Arc<dyn MetadataExtractor>>) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    /// Transaction manager shared by every document.
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Index one document.
    pub async fn index_document(&self, document: Document) -> Result<TransactionResult> {
        self.index_document_with_cancel(document, CancellationToken::new())
            .await
    }

    /// Index one document, aborting and rolling back if `cancel` fires.
    pub async fn index_document_with_cancel(
        &self,
        document: Document,
        cancel: CancellationToken,
    ) -> Result<TransactionResult> {
        let doc_id = document
            .doc_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match self.preprocessor.validate(&document) {
            Ok(()) => {}
            Err(IndexError::Validation(message)) => {
                warn!(doc_id = %doc_id, error = %message, "Document rejected");
                return Ok(TransactionResult::validation_failure(doc_id, &message));
            }
            Err(e) => return Err(e),
        }

        let document = document.with_metadata("doc_id", doc_id.clone());

        let lock = Arc::clone(
            self.subject_locks
                .entry(doc_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let mut subject = SubjectLock {
            locks: &self.subject_locks,
            subject_id: doc_id.clone(),
            guard: None,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let err = IndexError::Cancelled {
                    stage: "subject_lock".to_string(),
                };
                warn!(doc_id = %doc_id, "Cancelled while waiting for another run of this document");
                let mut result = TransactionResult::started(&doc_id);
                result.errors.push(format!("subject_lock: {err}"));
                return Ok(result);
            }
            guard = lock.lock_owned() => subject.guard = Some(guard),
        }

        self.run_transaction(&doc_id, document, &cancel).await
    }

    async fn run_transaction(
        &self,
        doc_id: &str,
        document: Document,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult> {
        let mut tracker = StageTracker::default();
        let tracker_ref = &mut tracker;

        info!(doc_id = %doc_id, "Indexing document");
        let outcome = self
            .manager
            .transaction_context(doc_id, |transaction_id| async move {
                tracker_ref.transaction_id = Some(transaction_id.clone());
                let mut runner = StageRunner {
                    manager: &self.manager,
                    policy: &self.policy,
                    transaction_id: &transaction_id,
                    cancel,
                    tracker: tracker_ref,
                };
                self.run_stages(&mut runner, document).await
            })
            .await;

        let mut result = TransactionResult::started(doc_id);
        result.transaction_id = tracker.transaction_id.clone();
        result.stages_completed = tracker.completed.clone();

        match outcome {
            Ok(()) => {
                result.success = true;
                info!(
                    doc_id = %doc_id,
                    tx_id = result.transaction_id.as_deref().unwrap_or_default(),
                    "Document indexed"
                );
            }
            Err(e) if e.is_document_failure() => {
                let stage = match &tracker.failed {
                    Some((kind, operation_id)) => {
                        result.failed_stage = Some(*kind);
                        result.failed_operation_id = Some(operation_id.clone());
                        kind.as_str()
                    }
                    None => "transaction",
                };
                result.errors.push(format!("{stage}: {e}"));
                self.record_rollback(&mut result);
                error!(doc_id = %doc_id, stage, error = %e, "Document indexing failed");
            }
            Err(e) => return Err(e),
        }

        Ok(result)
    }

    /// Fill in the rollback outcome from the finalized transaction.
    fn record_rollback(&self, result: &mut TransactionResult) {
        let Some(snapshot) = result
            .transaction_id
            .as_deref()
            .and_then(|id| self.manager.get_transaction_status(id))
        else {
            return;
        };
        if snapshot.status != TransactionStatus::RolledBack {
            return;
        }

        let clean = !snapshot
            .operations
            .iter()
            .any(|op| matches!(op.compensation, Some(CompensationRecord::Failed { .. })));
        result.rolled_back = true;
        result.compensation_clean = Some(clean);
        if !clean {
            result.errors.push("rollback_incomplete".to_string());
        }
    }

    async fn run_stages(&self, runner: &mut StageRunner<'_>, document: Document) -> Result<()> {
        let transaction_id = runner.transaction_id;

        let text_length = document.text.chars().count();
        let (_, prepared) = runner
            .run(
                OperationKind::Preprocess,
                json!({ "text_length": text_length }),
                None,
                self.preprocessor.preprocess(document, transaction_id),
            )
            .await?;

        let (_, chunks) = runner
            .run(
                OperationKind::Chunk,
                json!({ "doc_id": prepared.doc_id }),
                None,
                async {
                    let chunks = self.chunker.chunk(&prepared).await?;
                    if chunks.is_empty() {
                        return Err(IndexError::stage("chunk", "document produced no chunks"));
                    }
                    Ok(chunks)
                },
            )
            .await?;

        let chunk_count = chunks.len();
        let extractor_names: Vec<&str> = self.extractors.iter().map(|e| e.name()).collect();
        let (operation_id, (chunks, skipped)) = runner
            .run(
                OperationKind::ExtractMetadata,
                json!({ "chunk_count": chunk_count, "extractors": extractor_names }),
                None,
                self.extract_metadata(transaction_id, chunks),
            )
            .await?;
        if !skipped.is_empty() {
            self.manager.annotate_operation(
                transaction_id,
                &operation_id,
                "skipped_extractors",
                json!(skipped),
            )?;
        }

        let (_, chunks) = runner
            .run(
                OperationKind::Embed,
                json!({ "chunk_count": chunk_count, "dimension": self.embedder.dimension() }),
                None,
                self.embed(chunks),
            )
            .await?;

        runner
            .write_store(
                OperationKind::WriteDocumentStore,
                self.stores.document.as_ref(),
                document_records(&chunks),
            )
            .await?;
        runner
            .write_store(
                OperationKind::WriteVectorStore,
                self.stores.vector.as_ref(),
                vector_records(&chunks),
            )
            .await?;
        runner
            .write_store(
                OperationKind::WriteGraphStore,
                self.stores.graph.as_ref(),
                graph_triplets(transaction_id, &chunks),
            )
            .await?;

        Ok(())
    }

    /// Run every extractor; a failing extractor is skipped and named in the
    /// returned list.
    async fn extract_metadata(
        &self,
        transaction_id: &str,
        mut chunks: Vec<Chunk>,
    ) -> Result<(Vec<Chunk>, Vec<String>)> {
        let mut skipped = Vec::new();
        for extractor in &self.extractors {
            match extractor.extract(chunks.clone()).await {
                Ok(extracted) => chunks = extracted,
                Err(e) => {
                    warn!(
                        tx_id = %transaction_id,
                        extractor = extractor.name(),
                        error = %e,
                        "Metadata extractor failed, skipping"
                    );
                    skipped.push(extractor.name().to_string());
                }
            }
        }
        Ok((chunks, skipped))
    }

    async fn embed(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let dimension = self.embedder.dimension();
        for chunk in &mut chunks {
            let embedding = with_retry(&self.policy, OperationKind::Embed, || {
                self.embedder.embed(&chunk.content)
            })
            .await?;
            if embedding.len() != dimension {
                return Err(IndexError::stage(
                    "embed",
                    format!(
                        "embedding has {} dimensions, expected {dimension}",
                        embedding.len()
                    ),
                ));
            }
            chunk.embedding = Some(embedding);
        }
        Ok(chunks)
    }

    /// Per-store record counts and transaction statistics.
    pub async fn indexing_stats(&self) -> IndexingStats {
        let mut stores = BTreeMap::new();
        for store in self.stores.iter() {
            stores.insert(store.name().to_string(), store.count().await);
        }
        IndexingStats {
            stores,
            transactions: self.manager.get_summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StorageBackend;
    use crate::testing::{FailingEmbedder, FailingExtractor, MemoryStores, StalledEmbedder};
    use crate::transaction::OperationStatus;

    fn config() -> Config {
        let mut config = Config::default();
        config.pipeline.chunk_size = 100;
        config.pipeline.chunk_overlap = 0;
        config.pipeline.embedding_dimension = 16;
        config
    }

    fn coordinator(stores: &MemoryStores) -> PipelineCoordinator {
        PipelineCoordinator::from_config(&config(), stores.set()).unwrap()
    }

    /// Five sentences of 80 characters: five chunks at chunk_size 100.
    fn five_chunk_text() -> String {
        let cities = ["Tokyo", "Paris", "Cairo", "Lima", "Oslo"];
        cities
            .iter()
            .map(|city| {
                let sentence = format!("the team at Acme Labs in {city} measured the river");
                format!("{sentence:.<79} ")
            })
            .collect()
    }

    #[test]
    fn test_five_chunk_text_shape() {
        let chunker = SentenceChunker::new(100, 0).unwrap();
        assert_eq!(chunker.split(&five_chunk_text()).len(), 5);
    }

    #[tokio::test]
    async fn test_all_stages_succeed_and_commit() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores);

        let result = coordinator
            .index_document(Document::new(five_chunk_text()).with_metadata("doc_id", "doc-a"))
            .await
            .unwrap();

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.doc_id, "doc-a");
        assert_eq!(result.stages_completed, OperationKind::ALL.to_vec());
        assert!(result.errors.is_empty());
        assert!(!result.rolled_back);

        let status = coordinator
            .manager()
            .get_transaction_status(result.transaction_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(status.status, TransactionStatus::Committed);
        assert_eq!(status.failed_operations, 0);
        assert_eq!(status.total_operations, 7);

        assert_eq!(stores.document.len(), 5);
        assert_eq!(stores.vector.len(), 5);
        // Acme Labs plus one city per chunk, two triplets each
        assert_eq!(stores.graph.len(), 12);
    }

    #[tokio::test]
    async fn test_vector_failure_rolls_back_document_write() {
        let stores = MemoryStores::new();
        stores.vector.fail_writes("connection refused");
        let coordinator = coordinator(&stores);

        let result = coordinator
            .index_document(Document::new(five_chunk_text()))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.rolled_back);
        assert_eq!(result.compensation_clean, Some(true));
        assert_eq!(result.failed_stage, Some(OperationKind::WriteVectorStore));
        assert_eq!(
            result.errors,
            vec!["write_vector_store: Backend error in vector_store: connection refused"]
        );
        assert_eq!(stores.total(), 0);

        let status = coordinator
            .manager()
            .get_transaction_status(result.transaction_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(status.status, TransactionStatus::RolledBack);

        let vector_op = status.operation(OperationKind::WriteVectorStore).unwrap();
        assert_eq!(vector_op.status, OperationStatus::Failed);
        assert_eq!(Some(&vector_op.operation_id), result.failed_operation_id.as_ref());
        assert!(vector_op.compensation.is_none());

        let document_op = status.operation(OperationKind::WriteDocumentStore).unwrap();
        assert!(matches!(
            document_op.compensation,
            Some(CompensationRecord::Applied { .. })
        ));
        assert!(status.operation(OperationKind::WriteGraphStore).is_none());
    }

    #[tokio::test]
    async fn test_rollback_restores_prior_store_state() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores);

        let first = coordinator
            .index_document(Document::new("Ada Lovelace wrote notes in London."))
            .await
            .unwrap();
        assert!(first.success);
        let before = (stores.document.ids(), stores.vector.ids(), stores.graph.ids());

        stores.graph.fail_writes("graph offline");
        let second = coordinator
            .index_document(Document::new("Alan Turing worked at Bletchley Park."))
            .await
            .unwrap();
        assert!(!second.success);
        assert!(second.rolled_back);

        let after = (stores.document.ids(), stores.vector.ids(), stores.graph.ids());
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_dirty_rollback_is_reported() {
        let stores = MemoryStores::new();
        stores.graph.fail_writes("graph offline");
        stores.document.fail_deletes("document store read only");
        let coordinator = coordinator(&stores);

        let result = coordinator
            .index_document(Document::new("Grace Hopper lived in Arlington."))
            .await
            .unwrap();

        assert!(result.rolled_back);
        assert_eq!(result.compensation_clean, Some(false));
        assert_eq!(result.errors.last().map(String::as_str), Some("rollback_incomplete"));
        // Vector records were still compensated after the document delete failed.
        assert!(stores.vector.is_empty());
        assert!(!stores.document.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_creates_no_transaction() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores);

        let result = coordinator
            .index_document(Document::new("   ").with_metadata("doc_id", "empty"))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.doc_id, "empty");
        assert!(result.transaction_id.is_none());
        assert!(!result.rolled_back);
        assert!(result.errors[0].starts_with("validation_error: "));
        assert_eq!(coordinator.manager().get_summary().total_transactions, 0);
    }

    #[tokio::test]
    async fn test_extractor_failure_is_skipped() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores).with_extractors(vec![
            Arc::new(FailingExtractor),
            Arc::new(crate::backend::EntityExtractor::new().unwrap()),
        ]);

        let result = coordinator
            .index_document(Document::new("Marie Curie studied in Paris."))
            .await
            .unwrap();
        assert!(result.success);

        let tx = coordinator
            .manager()
            .get_transaction(result.transaction_id.as_deref().unwrap())
            .unwrap();
        let extract = tx
            .operations
            .iter()
            .find(|op| op.kind == OperationKind::ExtractMetadata)
            .unwrap();
        assert_eq!(extract.status, OperationStatus::Succeeded);
        assert_eq!(extract.data["skipped_extractors"], json!(["broken"]));
        assert!(!stores.graph.is_empty());
    }

    #[tokio::test]
    async fn test_embed_failure_rolls_back_before_any_write() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores).with_embedder(Arc::new(FailingEmbedder::on("poison")));

        let result = coordinator
            .index_document(Document::new("This text is poison."))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.failed_stage, Some(OperationKind::Embed));
        assert_eq!(
            result.stages_completed,
            vec![
                OperationKind::Preprocess,
                OperationKind::Chunk,
                OperationKind::ExtractMetadata
            ]
        );
        assert!(result.errors[0].starts_with("embed: "));
        assert!(result.rolled_back);
        assert_eq!(stores.total(), 0);
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_retried_in_stage() {
        let stores = MemoryStores::new();
        stores.document.fail_next_writes(2);
        let mut config = config();
        config.stages.max_retries = 2;
        config.stages.retry_backoff_ms = 1;
        let coordinator = PipelineCoordinator::from_config(&config, stores.set()).unwrap();

        let result = coordinator
            .index_document(Document::new("Retry until the store recovers."))
            .await
            .unwrap();

        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(stores.document.write_calls(), 3);
        let status = coordinator
            .manager()
            .get_transaction_status(result.transaction_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(status.total_operations, 7);
    }

    #[tokio::test]
    async fn test_cancellation_rolls_back() {
        let stores = MemoryStores::new();
        let embedder = StalledEmbedder::new();
        let called = Arc::clone(&embedder.called);
        let coordinator = Arc::new(coordinator(&stores).with_embedder(Arc::new(embedder)));
        let cancel = CancellationToken::new();

        let task = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .index_document_with_cancel(Document::new("Never finishes."), cancel)
                    .await
            })
        };

        called.notified().await;
        cancel.cancel();
        let result = task.await.unwrap().unwrap();

        assert!(!result.success);
        assert!(result.rolled_back);
        assert_eq!(result.failed_stage, Some(OperationKind::Embed));
        assert_eq!(result.errors, vec!["embed: Cancelled during stage 'embed'"]);
        assert_eq!(coordinator.manager().get_summary().active_transactions, 0);
    }

    #[tokio::test]
    async fn test_same_document_is_serialized() {
        let stores = MemoryStores::new();
        let coordinator = Arc::new(coordinator(&stores));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    coordinator
                        .index_document(
                            Document::new("Ada Lovelace wrote notes.").with_metadata("doc_id", "same"),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().success);
        }

        assert!(coordinator.manager().active_for_subject("same").is_empty());
        assert!(coordinator.subject_locks.is_empty());
        assert_eq!(coordinator.manager().get_summary().completed_transactions, 4);
    }

    #[tokio::test]
    async fn test_panicking_run_releases_subject_lock() {
        let stores = MemoryStores::new();
        let coordinator = Arc::new(
            coordinator(&stores).with_chunker(Arc::new(crate::testing::PanickingChunker::on("explode"))),
        );

        let task = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .index_document(Document::new("This will explode.").with_metadata("doc_id", "boom"))
                    .await
            })
        };
        assert!(task.await.unwrap_err().is_panic());
        assert!(coordinator.subject_locks.is_empty());

        let retry = coordinator
            .index_document(Document::new("Calm text this time.").with_metadata("doc_id", "boom"))
            .await
            .unwrap();
        assert!(retry.success);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_same_document() {
        let stores = MemoryStores::new();
        let embedder = StalledEmbedder::new();
        let called = Arc::clone(&embedder.called);
        let coordinator = Arc::new(coordinator(&stores).with_embedder(Arc::new(embedder)));

        let holder_cancel = CancellationToken::new();
        let holder = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = holder_cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .index_document_with_cancel(
                        Document::new("Held open.").with_metadata("doc_id", "shared"),
                        cancel,
                    )
                    .await
            })
        };
        called.notified().await;

        let waiter_cancel = CancellationToken::new();
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = waiter_cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .index_document_with_cancel(
                        Document::new("Queued behind.").with_metadata("doc_id", "shared"),
                        cancel,
                    )
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        waiter_cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .expect("waiter should return once cancelled")
            .unwrap()
            .unwrap();
        assert!(!result.success);
        assert!(result.transaction_id.is_none());
        assert!(!result.rolled_back);
        assert_eq!(
            result.errors,
            vec!["subject_lock: Cancelled during stage 'subject_lock'"]
        );
        assert_eq!(coordinator.manager().active_for_subject("shared").len(), 1);

        holder_cancel.cancel();
        assert!(holder.await.unwrap().unwrap().rolled_back);
        assert!(coordinator.subject_locks.is_empty());
    }

    #[tokio::test]
    async fn test_indexing_stats() {
        let stores = MemoryStores::new();
        let coordinator = coordinator(&stores);
        coordinator
            .index_document(Document::new("Ada Lovelace wrote notes in London."))
            .await
            .unwrap();

        let stats = coordinator.indexing_stats().await;
        assert_eq!(stats.stores["document_store"], Some(stores.document.len()));
        assert_eq!(stats.stores["graph_store"], stores.graph.count().await);
        assert_eq!(stats.transactions.completed_transactions, 1);
    }

    #[tokio::test]
    async fn test_journal_written_from_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("journal").join("tx.jsonl");
        let mut config = config();
        config.journal.path = Some(path.to_string_lossy().into_owned());

        let stores = MemoryStores::new();
        stores.graph.fail_writes("graph offline");
        let coordinator = PipelineCoordinator::from_config(&config, stores.set()).unwrap();
        coordinator
            .index_document(Document::new("Ada Lovelace wrote notes."))
            .await
            .unwrap();

        let entries = TransactionJournal::open(&path).unwrap().read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, TransactionStatus::RolledBack);
    }
}
