//! Backend module: collaborator traits and reference implementations.
//!
//! - `traits`: what the pipeline consumes
//! - `memory`: DashMap-backed store usable for all three stores
//! - `text`: preprocessing, chunking, heuristic metadata extraction
//! - `embedder`: deterministic hashing embedder

mod embedder;
mod memory;
mod text;
mod traits;

pub use embedder::*;
pub use memory::*;
pub use text::*;
pub use traits::*;

use std::sync::Arc;

/// Store names used in rollback payloads.
pub const DOCUMENT_STORE: &str = "document_store";
pub const VECTOR_STORE: &str = "vector_store";
pub const GRAPH_STORE: &str = "graph_store";

/// The three stores a document is written to.
#[derive(Clone)]
pub struct StoreSet {
    /// Chunk content and metadata
    pub document: Arc<dyn StorageBackend>,
    /// Chunk embeddings
    pub vector: Arc<dyn StorageBackend>,
    /// Entity relationships
    pub graph: Arc<dyn StorageBackend>,
}

impl StoreSet {
    pub fn new(
        document: Arc<dyn StorageBackend>,
        vector: Arc<dyn StorageBackend>,
        graph: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            document,
            vector,
            graph,
        }
    }

    /// Three empty in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new(DOCUMENT_STORE)),
            Arc::new(InMemoryStore::new(VECTOR_STORE)),
            Arc::new(InMemoryStore::new(GRAPH_STORE)),
        )
    }

    /// Stores in pipeline write order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StorageBackend>> {
        [&self.document, &self.vector, &self.graph].into_iter()
    }
}
