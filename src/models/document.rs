//! Document, chunk and result types for sagaweave.
//!
//! These types represent the data flowing through the indexing pipeline.

use crate::transaction::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw input document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Document text
    pub text: String,

    /// Base metadata (title, author, source, tags, doc_id, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Builder-style metadata setter.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Caller-supplied document id, if any.
    pub fn doc_id(&self) -> Option<&str> {
        self.metadata.get("doc_id").and_then(Value::as_str)
    }
}

/// Document after preprocessing: normalized text and enriched metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedDocument {
    /// Stable document id
    pub doc_id: String,

    /// Normalized text
    pub text: String,

    /// Enriched metadata
    pub metadata: Map<String, Value>,
}

/// One chunk of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk id
    pub chunk_id: String,

    /// Owning document
    pub doc_id: String,

    /// Chunk text
    pub content: String,

    /// Zero-based position within the document
    pub position: usize,

    /// Document metadata plus extractor output (title, keywords, summary, entities)
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Embedding, once the embed stage has run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Entities attached by the entity extractor.
    pub fn entities(&self) -> Vec<String> {
        self.metadata
            .get("entities")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A record written to one of the storage backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreRecord {
    /// Chunk content and metadata for the document store
    Document {
        id: String,
        doc_id: String,
        content: String,
        metadata: Map<String, Value>,
    },
    /// Embedding for the vector store
    Vector {
        id: String,
        doc_id: String,
        embedding: Vec<f32>,
    },
    /// Relationship for the graph store
    Triplet {
        id: String,
        subject: String,
        relation: String,
        object: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
}

impl StoreRecord {
    /// Record id, unique within its store.
    pub fn id(&self) -> &str {
        match self {
            Self::Document { id, .. } | Self::Vector { id, .. } | Self::Triplet { id, .. } => id,
        }
    }
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    /// Whether every stage succeeded and the transaction committed
    pub success: bool,

    /// Document id (assigned when the input had none)
    pub doc_id: String,

    /// Transaction id; `None` when no transaction was created
    pub transaction_id: Option<String>,

    /// Stages that completed, in order
    pub stages_completed: Vec<OperationKind>,

    /// Human-readable failure details, `"<stage>: <error>"`
    pub errors: Vec<String>,

    /// Stage that failed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<OperationKind>,

    /// Operation id of the failed stage, if it was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_operation_id: Option<String>,

    /// Whether a rollback ran for this document
    pub rolled_back: bool,

    /// Whether every compensation succeeded (only set when rolled back)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_clean: Option<bool>,
}

impl TransactionResult {
    /// Empty in-progress result for a document.
    pub fn started(doc_id: impl Into<String>) -> Self {
        Self {
            success: false,
            doc_id: doc_id.into(),
            transaction_id: None,
            stages_completed: Vec::new(),
            errors: Vec::new(),
            failed_stage: None,
            failed_operation_id: None,
            rolled_back: false,
            compensation_clean: None,
        }
    }

    /// Result for a document rejected before any transaction existed.
    pub fn validation_failure(doc_id: impl Into<String>, message: &str) -> Self {
        let mut result = Self::started(doc_id);
        result.errors.push(format!("validation_error: {message}"));
        result
    }

    /// Result for an unexpected error caught at the batch boundary.
    pub fn processing_error(doc_id: impl Into<String>, message: &str) -> Self {
        let mut result = Self::started(doc_id);
        result.errors.push(format!("processing_error: {message}"));
        result
    }
}

/// Statistics for a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Documents submitted
    pub total_documents: usize,

    /// Documents fully indexed
    pub succeeded: usize,

    /// Documents that failed
    pub failed: usize,

    /// Failed documents whose transaction was rolled back
    pub rolled_back: usize,

    /// Rollbacks where at least one compensation failed
    pub dirty_rollbacks: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Indexed documents per hour
    pub throughput_per_hour: f64,

    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,
}

impl BatchStats {
    /// Tally a batch of results.
    pub fn from_results(results: &[TransactionResult], runtime_secs: f64) -> Self {
        let mut stats = Self {
            total_documents: results.len(),
            runtime_secs,
            ..Default::default()
        };
        for result in results {
            if result.success {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            if result.rolled_back {
                stats.rolled_back += 1;
                if result.compensation_clean == Some(false) {
                    stats.dirty_rollbacks += 1;
                }
            }
        }
        stats.finalize();
        stats
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.total_documents > 0 {
            self.success_rate = self.succeeded as f64 / self.total_documents as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.succeeded as f64 / self.runtime_secs * 3600.0;
        }
    }
}
