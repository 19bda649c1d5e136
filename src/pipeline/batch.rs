//! Batch driver: indexes many documents concurrently, isolating failures.
//!
//! Epistemic foundation:
//! - K_i: Documents are independent units of work
//! - K_i: At most `concurrency` documents are indexed at once
//! - B_i: Any document may fail or panic → converted to a failed result
//! - I^R: Concurrency and progress display are configurable
//!
//! One result per input document, in input order. A coordinator error or a
//! panicking document task becomes a `processing_error` result; nothing
//! escapes the batch.

use crate::models::{BatchConfig, BatchStats, Document, IndexError, Result, TransactionResult};
use crate::pipeline::PipelineCoordinator;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{error, info};

/// Runs the coordinator over batches of documents.
pub struct BatchIndexer {
    coordinator: Arc<PipelineCoordinator>,
    /// Bounds concurrently indexed documents
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    show_progress: bool,
}

impl BatchIndexer {
    pub fn new(coordinator: Arc<PipelineCoordinator>, config: &BatchConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            coordinator,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            show_progress: config.show_progress,
        }
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    /// Load documents from a JSONL file, one `{"text": ..., "metadata": ...}`
    /// object per line. Blank lines are skipped.
    pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
        let file = File::open(path).map_err(|e| IndexError::io("opening documents file", e))?;
        let reader = BufReader::new(file);
        let mut documents = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| IndexError::io("reading documents file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let document: Document = serde_json::from_str(&line).map_err(|e| {
                IndexError::ParseError(format!("Line {}: {}", line_num + 1, e))
            })?;
            documents.push(document);
        }

        info!(count = documents.len(), "Loaded documents");
        Ok(documents)
    }

    /// Index every document; one result per input, input order preserved.
    pub async fn index_batch(&self, documents: Vec<Document>) -> Vec<TransactionResult> {
        self.index_batch_with_stats(documents).await.0
    }

    /// Index every document and tally the outcome.
    pub async fn index_batch_with_stats(
        &self,
        documents: Vec<Document>,
    ) -> (Vec<TransactionResult>, BatchStats) {
        let start = Instant::now();
        let total = documents.len();
        info!(total_documents = total, concurrency = self.concurrency, "Starting batch");

        let progress = self.progress_bar(total);

        let mut handles = Vec::with_capacity(total);
        for document in documents {
            let label = document.doc_id().unwrap_or("unknown").to_string();
            let coordinator = Arc::clone(&self.coordinator);
            let semaphore = Arc::clone(&self.semaphore);
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IndexError::Internal("Semaphore closed".to_string()))?;
                coordinator.index_document(document).await
            });
            handles.push((label, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (position, (label, handle)) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    error!(doc_id = %label, position, error = %e, "Document processing failed");
                    TransactionResult::processing_error(label, &e.to_string())
                }
                Err(e) => {
                    let message = panic_message(e);
                    error!(doc_id = %label, position, error = %message, "Document task panicked");
                    TransactionResult::processing_error(label, &message)
                }
            };

            if let Some(pb) = &progress {
                pb.inc(1);
            }
            results.push(result);
        }

        let stats = BatchStats::from_results(&results, start.elapsed().as_secs_f64());
        if let Some(pb) = progress {
            pb.finish_with_message(format!(
                "Done! {} indexed, {} failed",
                stats.succeeded, stats.failed
            ));
        }

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            rolled_back = stats.rolled_back,
            success_rate = format!("{:.1}%", stats.success_rate * 100.0),
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Batch complete"
        );

        (results, stats)
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        Some(pb)
    }
}

fn panic_message(e: JoinError) -> String {
    if e.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
