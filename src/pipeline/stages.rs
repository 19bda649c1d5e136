//! Stage execution: every stage registers its operation with the transaction
//! manager before touching anything, then reports the outcome.
//!
//! Epistemic foundation:
//! - K_i: Rollback payloads are computed before the side effect happens
//! - B_i: A collaborator call may fail transiently → bounded retry with backoff
//! - I^B: Cancellation may arrive at any await point → raced on every stage

use crate::backend::{stable_hash, StorageBackend};
use crate::models::{Chunk, IndexError, Result, StageConfig, StoreRecord};
use crate::transaction::{OperationKind, RollbackData, TransactionManager};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Progress of one document through the stages.
#[derive(Debug, Default)]
pub(crate) struct StageTracker {
    pub transaction_id: Option<String>,
    pub completed: Vec<OperationKind>,
    pub failed: Option<(OperationKind, String)>,
}

/// Runs stages for one transaction.
pub(crate) struct StageRunner<'a> {
    pub manager: &'a TransactionManager,
    pub policy: &'a StageConfig,
    pub transaction_id: &'a str,
    pub cancel: &'a CancellationToken,
    pub tracker: &'a mut StageTracker,
}

impl StageRunner<'_> {
    /// Record an operation, run `work` against the cancellation token, and
    /// report the outcome. Returns the operation id with the work's output.
    pub async fn run<T, Fut>(
        &mut self,
        kind: OperationKind,
        data: Value,
        rollback_data: Option<RollbackData>,
        work: Fut,
    ) -> Result<(String, T)>
    where
        Fut: Future<Output = Result<T>>,
    {
        let operation_id =
            self.manager
                .add_operation(self.transaction_id, kind, data, rollback_data)?;

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IndexError::Cancelled {
                stage: kind.as_str().to_string(),
            }),
            result = work => result.map_err(|e| {
                if e.is_document_failure() {
                    e
                } else {
                    IndexError::stage(kind.as_str(), e)
                }
            }),
        };

        match outcome {
            Ok(value) => {
                self.manager
                    .mark_success(self.transaction_id, &operation_id)?;
                self.tracker.completed.push(kind);
                debug!(tx_id = %self.transaction_id, stage = %kind, "Stage complete");
                Ok((operation_id, value))
            }
            Err(e) => {
                self.manager
                    .mark_failure(self.transaction_id, &operation_id, &e.to_string())?;
                self.tracker.failed = Some((kind, operation_id));
                Err(e)
            }
        }
    }

    /// Write records to a store as one recorded operation.
    ///
    /// The rollback payload lists every record id before the write starts; if
    /// the store reports additional committed ids they are added afterwards.
    pub async fn write_store(
        &mut self,
        kind: OperationKind,
        store: &dyn StorageBackend,
        records: Vec<StoreRecord>,
    ) -> Result<usize> {
        let ids: Vec<String> = records.iter().map(|r| r.id().to_string()).collect();
        let data = json!({
            "store": store.name(),
            "record_ids": ids,
            "count": ids.len(),
        });
        let rollback = RollbackData::RecordIds {
            store: store.name().to_string(),
            ids: ids.clone(),
        };

        let policy = self.policy;
        let (operation_id, committed) = self
            .run(
                kind,
                data,
                Some(rollback),
                with_retry(policy, kind, || store.write(records.clone())),
            )
            .await?;

        let known: HashSet<&String> = ids.iter().collect();
        let extra: Vec<String> = committed
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();
        if !extra.is_empty() {
            let mut all = ids.clone();
            all.extend(extra);
            self.manager.set_rollback_data(
                self.transaction_id,
                &operation_id,
                RollbackData::RecordIds {
                    store: store.name().to_string(),
                    ids: all,
                },
            )?;
        }

        Ok(ids.len())
    }
}

/// Retry `call` while it fails with a retryable error, backing off
/// exponentially, up to `policy.max_retries` extra attempts.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &StageConfig,
    kind: OperationKind,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!(
                    stage = %kind,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Chunk content and metadata for the document store.
pub(crate) fn document_records(chunks: &[Chunk]) -> Vec<StoreRecord> {
    chunks
        .iter()
        .map(|chunk| StoreRecord::Document {
            id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
        })
        .collect()
}

/// Embeddings for the vector store. Chunks without an embedding are skipped.
pub(crate) fn vector_records(chunks: &[Chunk]) -> Vec<StoreRecord> {
    chunks
        .iter()
        .filter_map(|chunk| {
            chunk.embedding.as_ref().map(|embedding| StoreRecord::Vector {
                id: chunk.chunk_id.clone(),
                doc_id: chunk.doc_id.clone(),
                embedding: embedding.clone(),
            })
        })
        .collect()
}

/// Entity triplets for the graph store.
///
/// Each entity yields `(entity_<hash>, IS_ENTITY, <entity>)` and
/// `(<doc_id>, CONTAINS_ENTITY, entity_<hash>)`. Triplet ids are derived from
/// the transaction and the triplet itself, so they are known before writing and
/// never collide with another transaction's triplets.
pub(crate) fn graph_triplets(transaction_id: &str, chunks: &[Chunk]) -> Vec<StoreRecord> {
    let mut seen = HashSet::new();
    let mut triplets = Vec::new();

    for chunk in chunks {
        for entity in chunk.entities() {
            let entity_id = format!("entity_{:016x}", stable_hash(&entity));

            let mut entity_props = Map::new();
            entity_props.insert("type".into(), json!("entity"));
            entity_props.insert("name".into(), json!(entity));
            entity_props.insert("doc_id".into(), json!(chunk.doc_id));

            let mut doc_props = Map::new();
            doc_props.insert("type".into(), json!("document"));
            doc_props.insert("doc_id".into(), json!(chunk.doc_id));

            for (subject, relation, object, properties) in [
                (entity_id.clone(), "IS_ENTITY", entity.clone(), entity_props),
                (chunk.doc_id.clone(), "CONTAINS_ENTITY", entity_id, doc_props),
            ] {
                let id = format!(
                    "triplet_{:016x}",
                    stable_hash(&format!("{transaction_id}|{subject}|{relation}|{object}"))
                );
                if seen.insert(id.clone()) {
                    triplets.push(StoreRecord::Triplet {
                        id,
                        subject,
                        relation: relation.to_string(),
                        object,
                        properties,
                    });
                }
            }
        }
    }

    triplets
}
