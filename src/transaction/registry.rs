//! Rollback registry: operation kind → compensating action.
//!
//! Epistemic foundation:
//! - K_i: Only store writes can be compensated; the kind table is exhaustive
//! - K_i: The registry is frozen before the first run
//! - B_i: A store delete may fail → reported, never retried here
//!
//! Built once before any pipeline run and immutable afterwards, so it is shared
//! as `Arc<RollbackRegistry>` between concurrent rollbacks without locking.

use crate::backend::{StorageBackend, StoreSet};
use crate::models::{IndexError, Result};
use crate::transaction::{OperationKind, RollbackData};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A compensating action for one operation kind.
///
/// Implementations must be idempotent: rollback may be retried by the caller,
/// so compensating the same payload twice must not corrupt state.
#[async_trait]
pub trait Compensation: Send + Sync {
    async fn compensate(&self, data: Option<&RollbackData>) -> Result<()>;
}

/// Compensates a store write by deleting the written record ids.
pub struct StoreCompensation {
    store: Arc<dyn StorageBackend>,
}

impl StoreCompensation {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Compensation for StoreCompensation {
    async fn compensate(&self, data: Option<&RollbackData>) -> Result<()> {
        let Some(RollbackData::RecordIds { store, ids }) = data else {
            debug!(store = self.store.name(), "No rollback data, nothing to delete");
            return Ok(());
        };

        if store != self.store.name() {
            return Err(IndexError::Internal(format!(
                "rollback data for '{store}' routed to '{}'",
                self.store.name()
            )));
        }

        if ids.is_empty() {
            return Ok(());
        }

        self.store.delete(ids).await?;
        info!(store = %store, count = ids.len(), "Store rollback: records deleted");
        Ok(())
    }
}

/// Fixed mapping from operation kind to compensation.
pub struct RollbackRegistry {
    handlers: HashMap<OperationKind, Arc<dyn Compensation>>,
}

impl RollbackRegistry {
    /// Start building a registry.
    pub fn builder() -> RollbackRegistryBuilder {
        RollbackRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// Registry with no handlers; every rollback is a logged no-op.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Standard registry: each store's `delete` compensates its write kind.
    pub fn for_backends(stores: &StoreSet) -> Result<Self> {
        Self::builder()
            .register(
                OperationKind::WriteDocumentStore,
                Arc::new(StoreCompensation::new(Arc::clone(&stores.document))),
            )?
            .register(
                OperationKind::WriteVectorStore,
                Arc::new(StoreCompensation::new(Arc::clone(&stores.vector))),
            )?
            .register(
                OperationKind::WriteGraphStore,
                Arc::new(StoreCompensation::new(Arc::clone(&stores.graph))),
            )
            .map(RollbackRegistryBuilder::build)
    }

    /// Handler for a kind, if registered.
    pub fn get(&self, kind: OperationKind) -> Option<&Arc<dyn Compensation>> {
        self.handlers.get(&kind)
    }

    /// Compensable kinds with no registered handler.
    pub fn missing_compensations(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|k| k.is_compensable() && !self.handlers.contains_key(k))
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder enforcing consistent forward/rollback pairing.
pub struct RollbackRegistryBuilder {
    handlers: HashMap<OperationKind, Arc<dyn Compensation>>,
}

impl RollbackRegistryBuilder {
    /// Register the compensation for a kind.
    ///
    /// Rejects kinds with no external side effect and duplicate registrations.
    pub fn register(mut self, kind: OperationKind, handler: Arc<dyn Compensation>) -> Result<Self> {
        if !kind.is_compensable() {
            return Err(IndexError::InvalidRegistration(format!(
                "{kind} has no external side effect to compensate"
            )));
        }
        if self.handlers.contains_key(&kind) {
            return Err(IndexError::InvalidRegistration(format!(
                "{kind} already has a compensation"
            )));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> RollbackRegistry {
        RollbackRegistry {
            handlers: self.handlers,
        }
    }
}
