//! Test doubles shared by the module tests.

use crate::backend::{
    Chunker, Embedder, HashEmbedder, InMemoryStore, MetadataExtractor, SentenceChunker, StoreSet,
    DOCUMENT_STORE, GRAPH_STORE, VECTOR_STORE,
};
use crate::models::{Chunk, IndexError, PreparedDocument, Result};
use crate::transaction::{Compensation, OperationKind, RollbackData};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shared record of compensation calls, in call order.
#[derive(Clone, Default)]
pub struct CompensationLog(Arc<Mutex<Vec<(OperationKind, Vec<String>)>>>);

impl CompensationLog {
    pub fn calls(&self) -> Vec<(OperationKind, Vec<String>)> {
        self.0.lock().unwrap().clone()
    }
}

/// Compensation that records what it was asked to undo.
pub struct RecordingCompensation {
    kind: OperationKind,
    log: CompensationLog,
    fail: bool,
}

impl RecordingCompensation {
    pub fn log() -> CompensationLog {
        CompensationLog::default()
    }

    pub fn new(kind: OperationKind, log: CompensationLog) -> Self {
        Self {
            kind,
            log,
            fail: false,
        }
    }

    /// Records the call, then fails.
    pub fn failing(kind: OperationKind, log: CompensationLog) -> Self {
        Self {
            kind,
            log,
            fail: true,
        }
    }
}

#[async_trait]
impl Compensation for RecordingCompensation {
    async fn compensate(&self, data: Option<&RollbackData>) -> Result<()> {
        let ids = match data {
            Some(RollbackData::RecordIds { ids, .. }) => ids.clone(),
            None => Vec::new(),
        };
        self.log.0.lock().unwrap().push((self.kind, ids));
        if self.fail {
            return Err(IndexError::backend(self.kind.as_str(), "delete refused"));
        }
        Ok(())
    }
}

/// Concrete handles to the in-memory stores behind a `StoreSet`.
pub struct MemoryStores {
    pub document: Arc<InMemoryStore>,
    pub vector: Arc<InMemoryStore>,
    pub graph: Arc<InMemoryStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            document: Arc::new(InMemoryStore::new(DOCUMENT_STORE)),
            vector: Arc::new(InMemoryStore::new(VECTOR_STORE)),
            graph: Arc::new(InMemoryStore::new(GRAPH_STORE)),
        }
    }

    pub fn set(&self) -> StoreSet {
        StoreSet::new(
            self.document.clone(),
            self.vector.clone(),
            self.graph.clone(),
        )
    }

    pub fn total(&self) -> usize {
        self.document.len() + self.vector.len() + self.graph.len()
    }
}

/// Hash embedder that fails on texts containing a marker.
pub struct FailingEmbedder {
    inner: HashEmbedder,
    marker: String,
}

impl FailingEmbedder {
    pub fn on(marker: &str) -> Self {
        Self {
            inner: HashEmbedder::new(16).unwrap(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.marker) {
            return Err(IndexError::stage("embed", "model unavailable"));
        }
        self.inner.embed(text).await
    }
}

/// Embedder that never finishes; signals once it has been called.
pub struct StalledEmbedder {
    pub called: Arc<Notify>,
}

impl StalledEmbedder {
    pub fn new() -> Self {
        Self {
            called: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Embedder for StalledEmbedder {
    fn dimension(&self) -> usize {
        16
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.called.notify_one();
        std::future::pending().await
    }
}

/// Extractor that always fails.
pub struct FailingExtractor;

#[async_trait]
impl MetadataExtractor for FailingExtractor {
    fn name(&self) -> &str {
        "broken"
    }

    async fn extract(&self, _chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        Err(IndexError::stage("extract_metadata", "extractor model missing"))
    }
}

/// Sentence chunker that panics on documents containing a marker.
pub struct PanickingChunker {
    inner: SentenceChunker,
    marker: String,
}

impl PanickingChunker {
    pub fn on(marker: &str) -> Self {
        Self {
            inner: SentenceChunker::new(200, 0).unwrap(),
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Chunker for PanickingChunker {
    async fn chunk(&self, document: &PreparedDocument) -> Result<Vec<Chunk>> {
        if document.text.contains(&self.marker) {
            panic!("chunker bug on {}", document.doc_id);
        }
        self.inner.chunk(document).await
    }
}
