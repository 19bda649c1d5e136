//! sagaweave - Saga-coordinated document indexing.
//!
//! ## Architecture
//!
//! A document is indexed into three independent stores (document, vector,
//! graph) that share no transaction. Every pipeline stage is recorded as an
//! operation of a saga transaction; when a stage fails, the operations that
//! already succeeded are undone by compensating actions in reverse order.
//!
//! - **Transaction manager**: lifecycle, commit, compensating rollback
//! - **Rollback registry**: operation kind → compensation, frozen at startup
//! - **Pipeline coordinator**: preprocess → chunk → extract → embed → write ×3
//! - **Batch indexer**: bounded concurrency, per-document failure isolation

pub mod backend;
pub mod models;
pub mod pipeline;
pub mod transaction;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use backend::{InMemoryStore, StorageBackend, StoreSet};
pub use models::{BatchStats, Config, Document, IndexError, Result, TransactionResult};
pub use pipeline::{BatchIndexer, IndexingStats, PipelineCoordinator};
pub use transaction::{
    OperationKind, RollbackRegistry, TransactionJournal, TransactionManager, TransactionStatus,
};
