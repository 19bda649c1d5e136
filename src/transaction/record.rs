//! Transaction and operation records.
//!
//! Passive data: every mutation goes through `TransactionManager`, which keeps
//! the counters consistent with the operation list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of operation recorded in a transaction, one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Preprocess,
    Chunk,
    ExtractMetadata,
    Embed,
    WriteDocumentStore,
    WriteVectorStore,
    WriteGraphStore,
}

impl OperationKind {
    /// Pipeline order.
    pub const ALL: [OperationKind; 7] = [
        Self::Preprocess,
        Self::Chunk,
        Self::ExtractMetadata,
        Self::Embed,
        Self::WriteDocumentStore,
        Self::WriteVectorStore,
        Self::WriteGraphStore,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Chunk => "chunk",
            Self::ExtractMetadata => "extract_metadata",
            Self::Embed => "embed",
            Self::WriteDocumentStore => "write_document_store",
            Self::WriteVectorStore => "write_vector_store",
            Self::WriteGraphStore => "write_graph_store",
        }
    }

    /// Whether the operation has an external side effect that needs a
    /// compensating action.
    pub fn is_compensable(&self) -> bool {
        match self {
            Self::Preprocess | Self::Chunk | Self::ExtractMetadata | Self::Embed => false,
            Self::WriteDocumentStore | Self::WriteVectorStore | Self::WriteGraphStore => true,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, not yet started
    Pending,
    /// Stages are running
    InProgress,
    /// All operations succeeded; final
    Committed,
    /// Compensations ran; final
    RolledBack,
    /// Could not be created or started; final
    Failed,
}

impl TransactionStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }
}

/// Minimal data needed to undo an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackData {
    /// Delete these record ids from the named store
    RecordIds { store: String, ids: Vec<String> },
}

/// Outcome of running the compensation for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompensationRecord {
    /// Handler ran and succeeded
    Applied { at: DateTime<Utc> },
    /// Handler ran and returned an error
    Failed { at: DateTime<Utc>, error: String },
    /// No handler registered for the kind; treated as success
    NoHandler,
}

/// One recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    /// Forward payload
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<RollbackData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationRecord>,
}

/// Bookkeeping for all operations performed while indexing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub subject_id: String,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub operations: Vec<Operation>,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set once a rollback has claimed this transaction
    #[serde(skip)]
    pub(crate) rollback_started: bool,
}

impl Transaction {
    pub(crate) fn new(transaction_id: String, subject_id: String) -> Self {
        Self {
            transaction_id,
            subject_id,
            status: TransactionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            operations: Vec::new(),
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            error_message: None,
            rollback_started: false,
        }
    }

    pub(crate) fn operation_mut(&mut self, operation_id: &str) -> Option<&mut Operation> {
        self.operations
            .iter_mut()
            .find(|op| op.operation_id == operation_id)
    }

    /// Serializable view for status queries and the audit journal.
    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            transaction_id: self.transaction_id.clone(),
            subject_id: self.subject_id.clone(),
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            total_operations: self.total_operations,
            successful_operations: self.successful_operations,
            failed_operations: self.failed_operations,
            error_message: self.error_message.clone(),
            operations: self
                .operations
                .iter()
                .map(|op| OperationSnapshot {
                    operation_id: op.operation_id.clone(),
                    kind: op.kind,
                    status: op.status,
                    timestamp: op.timestamp,
                    error_message: op.error_message.clone(),
                    compensation: op.compensation.clone(),
                })
                .collect(),
        }
    }
}

/// Status snapshot of a transaction. Payloads are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub transaction_id: String,
    pub subject_id: String,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub error_message: Option<String>,
    pub operations: Vec<OperationSnapshot>,
}

impl TransactionSnapshot {
    /// First recorded operation of the given kind.
    pub fn operation(&self, kind: OperationKind) -> Option<&OperationSnapshot> {
        self.operations.iter().find(|op| op.kind == kind)
    }
}

/// Status snapshot of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub operation_id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
    pub compensation: Option<CompensationRecord>,
}
