//! Collaborator traits consumed by the pipeline.
//!
//! Each stage of the pipeline delegates its real work to one of these. The
//! coordinator never inspects their internals; it only records what they did
//! so the transaction manager can undo it.

use crate::models::{Chunk, Document, PreparedDocument, Result, StoreRecord};
use async_trait::async_trait;

/// Validates and normalizes raw documents.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Reject empty or malformed input. Runs before any transaction exists.
    fn validate(&self, document: &Document) -> Result<()>;

    /// Normalize text and enrich metadata for a document entering `transaction_id`.
    async fn preprocess(&self, document: Document, transaction_id: &str)
        -> Result<PreparedDocument>;
}

/// Splits a prepared document into chunks.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk(&self, document: &PreparedDocument) -> Result<Vec<Chunk>>;
}

/// Attaches metadata to chunks. Failures are skipped by the pipeline.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Name recorded when this extractor is skipped.
    fn name(&self) -> &str;

    async fn extract(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>>;
}

/// Produces a fixed-dimension embedding for a piece of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A store that can write records and delete them again by id.
///
/// `delete` must be idempotent: ids that are already gone are ignored.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store name, as used in rollback payloads.
    fn name(&self) -> &str;

    /// Write records, returning the ids actually committed.
    async fn write(&self, records: Vec<StoreRecord>) -> Result<Vec<String>>;

    /// Delete records by id.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Number of records held, when the backend can report it cheaply.
    async fn count(&self) -> Option<usize> {
        None
    }
}
