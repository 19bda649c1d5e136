//! sagaweave CLI - Saga-coordinated document indexing.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sagaweave::{BatchIndexer, Config, PipelineCoordinator, StoreSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sagaweave")]
#[command(version)]
#[command(about = "Index documents into document, vector and graph stores with compensating rollback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a JSONL file of documents into in-memory stores
    Index {
        /// Path to input documents JSONL file
        #[arg(short, long)]
        documents: PathBuf,

        /// Write one result per document to this JSONL file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override batch.concurrency
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

/// Load the config file, or fall back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        warn!(path = ?path, "Config file not found, using defaults");
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_example_config() {
    let example = r#"# sagaweave configuration file

[pipeline]
chunk_size = 1024
chunk_overlap = 200
embedding_dimension = 768
keywords_per_chunk = 10
# Run in order; any subset of title, keywords, summary, entities
extractors = ["title", "keywords", "summary", "entities"]

[stages]
# Extra attempts for transient store errors, inside the stage
max_retries = 2
retry_backoff_ms = 100

[batch]
concurrency = 4
show_progress = true

[retention]
# Completed transactions older than this are purged
days = 7

[journal]
# One JSON line per finalized transaction
# path = "${HOME}/.sagaweave/transactions.jsonl"
"#;
    println!("{example}");
}

fn write_results(path: &Path, results: &[sagaweave::TransactionResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {parent:?}"))?;
        }
    }
    let file = File::create(path).with_context(|| format!("Failed to create {path:?}"))?;
    let mut writer = BufWriter::new(file);
    for result in results {
        serde_json::to_writer(&mut writer, result)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            info!("Configuration is valid");
            info!(
                "  Chunking: {} chars, {} overlap",
                config.pipeline.chunk_size, config.pipeline.chunk_overlap
            );
            info!("  Embedding dimension: {}", config.pipeline.embedding_dimension);
            info!("  Extractors: {}", config.pipeline.extractors.join(", "));
            info!("  Concurrency: {}", config.batch.concurrency);
            match config.journal.resolved_path() {
                Some(path) => info!("  Journal: {path:?}"),
                None => info!("  Journal: disabled"),
            }
        }

        Commands::Index {
            documents,
            output,
            concurrency,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(concurrency) = concurrency {
                config.batch.concurrency = concurrency;
            }

            let coordinator = PipelineCoordinator::from_config(&config, StoreSet::in_memory())
                .context("Failed to build pipeline")?;
            let indexer = BatchIndexer::new(Arc::new(coordinator), &config.batch);

            let docs = BatchIndexer::load_documents(&documents)
                .with_context(|| format!("Failed to load documents from {documents:?}"))?;
            let (results, stats) = indexer.index_batch_with_stats(docs).await;

            match &output {
                Some(output) => write_results(output, &results)?,
                None => {
                    for result in &results {
                        println!("{}", serde_json::to_string(result)?);
                    }
                }
            }

            let manager = indexer.coordinator().manager();
            let purged = manager.cleanup_old(config.retention.days);
            if purged > 0 {
                info!(purged, "Purged old transactions");
            }
            let indexing = indexer.coordinator().indexing_stats().await;

            println!("\n=== Indexing Complete ===");
            println!("Documents:   {}", stats.total_documents);
            println!("Indexed:     {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Rolled back: {}", stats.rolled_back);
            println!("Dirty:       {}", stats.dirty_rollbacks);
            println!("Success:     {:.1}%", stats.success_rate * 100.0);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            for (store, count) in &indexing.stores {
                match count {
                    Some(count) => println!("{:<13}{count}", format!("{store}:")),
                    None => println!("{:<13}n/a", format!("{store}:")),
                }
            }
            if let Some(output) = output {
                println!("Output:      {output:?}");
            }
        }
    }

    Ok(())
}
