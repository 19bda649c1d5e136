//! Scoped transaction helper.
//!
//! Wraps a unit of work in create → start → body → commit, rolling back when
//! the body fails, when commit is refused, or when the scope is abandoned
//! (future dropped or body panicked).

use crate::models::{IndexError, Result};
use crate::transaction::TransactionManager;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

impl TransactionManager {
    /// Run `body` inside a transaction for `subject_id`.
    ///
    /// - body `Ok` and commit accepted: returns the body's value
    /// - body `Ok` but commit refused: rolls back, returns `CommitRejected`
    /// - body `Err`: rolls back, returns the body's error unchanged
    pub async fn transaction_context<T, F, Fut>(
        self: &Arc<Self>,
        subject_id: &str,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let transaction_id = self.create_transaction(subject_id)?;
        let mut guard = ScopeGuard::new(Arc::clone(self), transaction_id.clone());
        self.start(&transaction_id)?;

        let outcome = body(transaction_id.clone()).await;

        // From here on the scope settles the transaction itself.
        guard.disarm();

        match outcome {
            Ok(value) => {
                if self.commit(&transaction_id)? {
                    return Ok(value);
                }
                let failed_operations = self
                    .get_transaction_status(&transaction_id)
                    .map(|s| s.failed_operations)
                    .unwrap_or_default();
                self.rollback(&transaction_id).await?;
                Err(IndexError::CommitRejected {
                    transaction_id,
                    failed_operations,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback(&transaction_id).await {
                    error!(tx_id = %transaction_id, error = %rollback_err, "Rollback after failure did not complete");
                }
                Err(e)
            }
        }
    }
}

/// Rolls back the transaction if the scope ends without settling it.
struct ScopeGuard {
    manager: Arc<TransactionManager>,
    transaction_id: String,
    armed: bool,
}

impl ScopeGuard {
    fn new(manager: Arc<TransactionManager>, transaction_id: String) -> Self {
        Self {
            manager,
            transaction_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let transaction_id = std::mem::take(&mut self.transaction_id);
        warn!(tx_id = %transaction_id, "Transaction scope abandoned, scheduling rollback");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = Arc::clone(&self.manager);
                handle.spawn(async move {
                    if let Err(e) = manager.rollback(&transaction_id).await {
                        error!(tx_id = %transaction_id, error = %e, "Scheduled rollback failed");
                    }
                });
            }
            Err(_) => {
                error!(tx_id = %transaction_id, "No runtime available, transaction left active");
            }
        }
    }
}
