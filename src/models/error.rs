//! Error types for sagaweave.
//!
//! Taxonomy:
//! - Document failures: expected, per-document outcomes (invalid input, a stage
//!   or store that failed, cancellation). These become `TransactionResult`
//!   failures and never escape the coordinator.
//! - Compensation failures: logged and skipped during rollback.
//! - Invariant violations: programmer or setup errors (unknown transaction,
//!   illegal state transition). These propagate.

use crate::transaction::OperationKind;
use thiserror::Error;

/// Top-level error type for sagaweave.
#[derive(Debug, Error)]
pub enum IndexError {
    // ═══════════════════════════════════════════════════════════════════
    // DOCUMENT FAILURES: modeled, per-document outcomes
    // ═══════════════════════════════════════════════════════════════════
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Backend error in {store}: {message}")]
    Backend {
        store: String,
        message: String,
        retryable: bool,
    },

    #[error("Cancelled during stage '{stage}'")]
    Cancelled { stage: String },

    #[error("Commit rejected for transaction {transaction_id}: {failed_operations} failed operation(s)")]
    CommitRejected {
        transaction_id: String,
        failed_operations: usize,
    },

    // ═══════════════════════════════════════════════════════════════════
    // COMPENSATION FAILURES: logged, never mask the original error
    // ═══════════════════════════════════════════════════════════════════
    #[error("Rollback of {kind} failed: {message}")]
    Rollback { kind: OperationKind, message: String },

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT VIOLATIONS: programmer / setup errors
    // ═══════════════════════════════════════════════════════════════════
    #[error("Transaction {0} not found")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid compensation registration: {0}")]
    InvalidRegistration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // ═══════════════════════════════════════════════════════════════════
    // AMBIENT: configuration and IO
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a stage error.
    pub fn stage(stage: impl Into<String>, message: impl ToString) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Create a non-retryable backend error.
    pub fn backend(store: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            store: store.into(),
            message: message.to_string(),
            retryable: false,
        }
    }

    /// Create a backend error that may succeed when retried.
    pub fn transient(store: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            store: store.into(),
            message: message.to_string(),
            retryable: true,
        }
    }

    /// Whether this error is an expected per-document outcome.
    ///
    /// The coordinator turns these into failed `TransactionResult`s; every
    /// other variant is a programmer or setup error and propagates.
    pub fn is_document_failure(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Stage { .. }
                | Self::Backend { .. }
                | Self::Cancelled { .. }
                | Self::CommitRejected { .. }
        )
    }

    /// Check if this error is retryable inside a stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { retryable: true, .. })
    }
}

/// Result type alias for sagaweave.
pub type Result<T> = std::result::Result<T, IndexError>;
