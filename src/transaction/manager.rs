//! Transaction manager: operation bookkeeping, commit and compensating rollback.
//!
//! Epistemic foundation:
//! - K_i: Store writes have external side effects; every other stage is local
//! - K_i: Each transaction is finalized exactly once (committed or rolled back)
//! - B_i: Any stage may fail → recorded as a failed operation, never a panic
//! - B_i: A compensation may fail → logged, remaining compensations still run
//! - I^B: Whether a store delete really happened is unknowable → audit record
//!
//! Guarantees:
//! - `total_operations == operations.len()` for every transaction
//! - commit succeeds iff no operation failed
//! - rollback compensates succeeded operations in reverse order, stopping at
//!   the first failed operation (it and everything after it are never touched)
//! - every transaction is finalized exactly once, then becomes immutable
//!
//! The active and completed collections are sharded maps keyed by transaction
//! id; a transaction's operation list is only mutated by the task that owns it.

use crate::models::{IndexError, Result};
use crate::transaction::{
    CompensationRecord, Operation, OperationKind, OperationStatus, RollbackData, RollbackRegistry,
    Transaction, TransactionJournal, TransactionSnapshot, TransactionStatus,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Manager-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub active_transactions: usize,
    pub completed_transactions: usize,
    pub completed_by_status: BTreeMap<TransactionStatus, usize>,
    pub total_transactions: usize,
}

/// Tracks every indexing transaction of one pipeline.
///
/// Construct one per pipeline and share it as `Arc<TransactionManager>`; there
/// is no process-wide instance.
pub struct TransactionManager {
    active: DashMap<String, Transaction>,
    completed: DashMap<String, Transaction>,
    registry: Arc<RollbackRegistry>,
    journal: Option<TransactionJournal>,
}

impl TransactionManager {
    /// Create a manager that compensates through `registry`.
    pub fn new(registry: Arc<RollbackRegistry>) -> Self {
        Self {
            active: DashMap::new(),
            completed: DashMap::new(),
            registry,
            journal: None,
        }
    }

    /// Record every finalized transaction in an audit journal.
    pub fn with_journal(mut self, journal: TransactionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Compensation registry.
    pub fn registry(&self) -> &Arc<RollbackRegistry> {
        &self.registry
    }

    /// Allocate a new transaction in `pending`.
    ///
    /// A blank subject id is recorded as a `failed` transaction for audit and
    /// rejected with a validation error.
    pub fn create_transaction(&self, subject_id: &str) -> Result<String> {
        let transaction_id = Uuid::new_v4().to_string();
        let mut tx = Transaction::new(transaction_id.clone(), subject_id.to_string());

        if subject_id.trim().is_empty() {
            let message = "subject id must not be empty".to_string();
            tx.status = TransactionStatus::Failed;
            tx.end_time = Some(Utc::now());
            tx.error_message = Some(message.clone());
            self.journal_entry(&tx);
            self.completed.insert(transaction_id.clone(), tx);
            warn!(tx_id = %transaction_id, "Transaction creation failed: blank subject id");
            return Err(IndexError::Validation(message));
        }

        self.active.insert(transaction_id.clone(), tx);
        info!(tx_id = %transaction_id, doc_id = %subject_id, "Transaction created");
        Ok(transaction_id)
    }

    /// Transition `pending → in_progress`. No-op if already started.
    pub fn start(&self, transaction_id: &str) -> Result<()> {
        let mut tx = self.active_entry(transaction_id)?;
        if tx.status == TransactionStatus::Pending {
            tx.status = TransactionStatus::InProgress;
            info!(tx_id = %transaction_id, "Transaction started");
        }
        Ok(())
    }

    /// Append a `pending` operation and return its id.
    pub fn add_operation(
        &self,
        transaction_id: &str,
        kind: OperationKind,
        data: serde_json::Value,
        rollback_data: Option<RollbackData>,
    ) -> Result<String> {
        let mut tx = self.active_entry(transaction_id)?;
        if tx.rollback_started {
            return Err(IndexError::InvalidState(format!(
                "transaction {transaction_id} is rolling back"
            )));
        }

        let operation_id = Uuid::new_v4().to_string();
        tx.operations.push(Operation {
            operation_id: operation_id.clone(),
            kind,
            status: OperationStatus::Pending,
            timestamp: Utc::now(),
            data,
            rollback_data,
            error_message: None,
            compensation: None,
        });
        tx.total_operations += 1;

        debug!(tx_id = %transaction_id, op_id = %operation_id, kind = %kind, "Operation added");
        Ok(operation_id)
    }

    /// Replace an operation's rollback payload.
    pub fn set_rollback_data(
        &self,
        transaction_id: &str,
        operation_id: &str,
        rollback_data: RollbackData,
    ) -> Result<()> {
        let mut tx = self.active_entry(transaction_id)?;
        let op = tx
            .operation_mut(operation_id)
            .ok_or_else(|| IndexError::NotFound(format!("{transaction_id}/{operation_id}")))?;
        op.rollback_data = Some(rollback_data);
        Ok(())
    }

    /// Add a field to an operation's forward payload.
    pub fn annotate_operation(
        &self,
        transaction_id: &str,
        operation_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut tx = self.active_entry(transaction_id)?;
        let op = tx
            .operation_mut(operation_id)
            .ok_or_else(|| IndexError::NotFound(format!("{transaction_id}/{operation_id}")))?;
        match &mut op.data {
            serde_json::Value::Object(map) => {
                map.insert(key.to_string(), value);
            }
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.take());
                map.insert(key.to_string(), value);
                *other = serde_json::Value::Object(map);
            }
        }
        Ok(())
    }

    /// Mark an operation as succeeded.
    pub fn mark_success(&self, transaction_id: &str, operation_id: &str) -> Result<()> {
        self.mark(transaction_id, operation_id, OperationStatus::Succeeded, None)
    }

    /// Mark an operation as failed.
    pub fn mark_failure(&self, transaction_id: &str, operation_id: &str, error: &str) -> Result<()> {
        self.mark(
            transaction_id,
            operation_id,
            OperationStatus::Failed,
            Some(error.to_string()),
        )
    }

    fn mark(
        &self,
        transaction_id: &str,
        operation_id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut tx = self.active_entry(transaction_id)?;
        let op = tx
            .operation_mut(operation_id)
            .ok_or_else(|| IndexError::NotFound(format!("{transaction_id}/{operation_id}")))?;

        if op.status == status {
            return Ok(());
        }
        if op.status != OperationStatus::Pending {
            return Err(IndexError::InvalidState(format!(
                "operation {operation_id} is already {:?}",
                op.status
            )));
        }

        op.status = status;
        let kind = op.kind;
        match status {
            OperationStatus::Succeeded => {
                tx.successful_operations += 1;
                debug!(tx_id = %transaction_id, op_id = %operation_id, kind = %kind, "Operation succeeded");
            }
            OperationStatus::Failed => {
                let message = error.unwrap_or_default();
                error!(tx_id = %transaction_id, op_id = %operation_id, kind = %kind, error = %message, "Operation failed");
                if let Some(op) = tx.operation_mut(operation_id) {
                    op.error_message = Some(message);
                }
                tx.failed_operations += 1;
            }
            OperationStatus::Pending => {}
        }
        Ok(())
    }

    /// Commit a transaction.
    ///
    /// Returns `false` and leaves the transaction active when any operation
    /// failed.
    pub fn commit(&self, transaction_id: &str) -> Result<bool> {
        {
            let tx = self.active_entry(transaction_id)?;
            if tx.status == TransactionStatus::Pending {
                return Err(IndexError::InvalidState(format!(
                    "transaction {transaction_id} was never started"
                )));
            }
            if tx.failed_operations > 0 {
                warn!(
                    tx_id = %transaction_id,
                    failed = tx.failed_operations,
                    "Transaction has failed operations, cannot commit"
                );
                return Ok(false);
            }
            let unresolved = tx.total_operations - tx.successful_operations;
            if unresolved > 0 {
                warn!(tx_id = %transaction_id, unresolved, "Committing with unresolved operations");
            }
        }

        self.finalize(transaction_id, TransactionStatus::Committed, |_| {})?;
        info!(tx_id = %transaction_id, "Transaction committed");
        Ok(true)
    }

    /// Roll back a transaction by running compensations in reverse order.
    ///
    /// Always finalizes the transaction as `rolled_back`. Returns whether every
    /// compensation succeeded. A second call on a completed transaction is a
    /// no-op returning `true`.
    ///
    /// The work runs on a spawned task, so dropping the returned future does
    /// not abandon a half-finished rollback.
    pub async fn rollback(self: &Arc<Self>, transaction_id: &str) -> Result<bool> {
        let manager = Arc::clone(self);
        let id = transaction_id.to_string();
        tokio::spawn(async move { manager.run_rollback(&id).await })
            .await
            .map_err(|e| IndexError::Internal(format!("Rollback task failed: {e}")))?
    }

    async fn run_rollback(&self, transaction_id: &str) -> Result<bool> {
        let plan = {
            let Some(mut tx) = self.active.get_mut(transaction_id) else {
                if self.completed.contains_key(transaction_id) {
                    debug!(tx_id = %transaction_id, "Transaction already completed, rollback is a no-op");
                    return Ok(true);
                }
                return Err(IndexError::NotFound(transaction_id.to_string()));
            };
            if tx.status.is_terminal() {
                debug!(tx_id = %transaction_id, "Transaction already completed, rollback is a no-op");
                return Ok(true);
            }
            if tx.rollback_started {
                debug!(tx_id = %transaction_id, "Rollback already in progress");
                return Ok(true);
            }
            tx.rollback_started = true;
            compensation_plan(&tx.operations)
        };

        info!(tx_id = %transaction_id, compensations = plan.len(), "Transaction rollback started");

        let mut all_compensated = true;
        let mut outcomes = Vec::with_capacity(plan.len());

        for step in plan {
            let outcome = match self.registry.get(step.kind) {
                None => {
                    warn!(tx_id = %transaction_id, kind = %step.kind, "No rollback handler registered");
                    CompensationRecord::NoHandler
                }
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    let data = step.rollback_data.clone();
                    let result = tokio::spawn(async move { handler.compensate(data.as_ref()).await })
                        .await
                        .unwrap_or_else(|e| {
                            Err(IndexError::Internal(format!("Compensation task panicked: {e}")))
                        });

                    match result {
                        Ok(()) => {
                            info!(tx_id = %transaction_id, op_id = %step.operation_id, kind = %step.kind, "Operation rolled back");
                            CompensationRecord::Applied { at: Utc::now() }
                        }
                        Err(e) => {
                            all_compensated = false;
                            let err = IndexError::Rollback {
                                kind: step.kind,
                                message: e.to_string(),
                            };
                            error!(tx_id = %transaction_id, op_id = %step.operation_id, error = %err, "Rollback failed");
                            CompensationRecord::Failed {
                                at: Utc::now(),
                                error: e.to_string(),
                            }
                        }
                    }
                }
            };
            outcomes.push((step.index, outcome));
        }

        self.finalize(transaction_id, TransactionStatus::RolledBack, |tx| {
            for (index, outcome) in outcomes {
                tx.operations[index].compensation = Some(outcome);
            }
            if !all_compensated {
                tx.error_message = Some("one or more compensations failed".to_string());
            }
        })?;

        info!(tx_id = %transaction_id, clean = all_compensated, "Transaction rollback complete");
        Ok(all_compensated)
    }

    /// Move an active transaction to the completed set.
    fn finalize(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        update: impl FnOnce(&mut Transaction),
    ) -> Result<()> {
        // Publish to `completed` while still holding the active entry, so the
        // transaction is visible in at least one map at every instant.
        let finalized = {
            let mut tx = self.active_entry(transaction_id)?;
            update(&mut *tx);
            tx.status = status;
            tx.end_time = Some(Utc::now());
            let finalized = (*tx).clone();
            self.completed
                .insert(transaction_id.to_string(), finalized.clone());
            finalized
        };
        self.active.remove(transaction_id);

        self.journal_entry(&finalized);
        Ok(())
    }

    fn journal_entry(&self, tx: &Transaction) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&tx.snapshot()) {
                error!(tx_id = %tx.transaction_id, error = %e, "Failed to journal transaction");
            }
        }
    }

    /// Mutable handle to an active, not yet finalized transaction.
    fn active_entry(
        &self,
        transaction_id: &str,
    ) -> Result<dashmap::mapref::one::RefMut<'_, String, Transaction>> {
        match self.active.get_mut(transaction_id) {
            Some(tx) if !tx.status.is_terminal() => Ok(tx),
            _ => Err(IndexError::NotFound(transaction_id.to_string())),
        }
    }

    /// Status snapshot from the active or completed set.
    pub fn get_transaction_status(&self, transaction_id: &str) -> Option<TransactionSnapshot> {
        self.active
            .get(transaction_id)
            .map(|tx| tx.snapshot())
            .or_else(|| self.completed.get(transaction_id).map(|tx| tx.snapshot()))
    }

    /// Full record including payloads.
    pub fn get_transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.active
            .get(transaction_id)
            .map(|tx| tx.clone())
            .or_else(|| self.completed.get(transaction_id).map(|tx| tx.clone()))
    }

    /// Ids of active transactions for a subject.
    pub fn active_for_subject(&self, subject_id: &str) -> Vec<String> {
        self.active
            .iter()
            .filter(|entry| entry.subject_id == subject_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Purge completed transactions started more than `days` ago.
    pub fn cleanup_old(&self, days: u32) -> usize {
        self.cleanup_older_than(Utc::now() - Duration::days(i64::from(days)))
    }

    /// Purge completed transactions started before `cutoff`.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.completed.retain(|_, tx| {
            let keep = tx.start_time >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        info!(removed, "Old transactions purged");
        removed
    }

    /// Manager-wide counts.
    pub fn get_summary(&self) -> TransactionSummary {
        let active_transactions = self
            .active
            .iter()
            .filter(|tx| !tx.status.is_terminal())
            .count();
        let mut completed_by_status = BTreeMap::new();
        let mut completed_transactions = 0;
        for tx in self.completed.iter() {
            *completed_by_status.entry(tx.status).or_insert(0) += 1;
            completed_transactions += 1;
        }

        TransactionSummary {
            active_transactions,
            completed_transactions,
            completed_by_status,
            total_transactions: active_transactions + completed_transactions,
        }
    }
}

struct CompensationStep {
    index: usize,
    operation_id: String,
    kind: OperationKind,
    rollback_data: Option<RollbackData>,
}

/// Succeeded compensable operations before the first failure, newest first.
fn compensation_plan(operations: &[Operation]) -> Vec<CompensationStep> {
    let mut steps: Vec<CompensationStep> = operations
        .iter()
        .enumerate()
        .take_while(|(_, op)| op.status != OperationStatus::Failed)
        .filter(|(_, op)| op.status == OperationStatus::Succeeded && op.kind.is_compensable())
        .map(|(index, op)| CompensationStep {
            index,
            operation_id: op.operation_id.clone(),
            kind: op.kind,
            rollback_data: op.rollback_data.clone(),
        })
        .collect();
    steps.reverse();
    steps
}
