//! Configuration models for sagaweave.
//!
//! Every tunable of the pipeline is parameterized here and resolved at runtime
//! from a TOML file. All sections are optional; missing fields take defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names accepted in `pipeline.extractors`.
pub const KNOWN_EXTRACTORS: [&str; 4] = ["title", "keywords", "summary", "entities"];

/// Top-level configuration for sagaweave.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunking, embedding and extraction settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// In-stage retry policy for collaborator calls
    #[serde(default)]
    pub stages: StageConfig,

    /// Batch driver settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Retention of completed transaction records
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Audit journal settings
    #[serde(default)]
    pub journal: JournalConfig,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Length of every embedding vector
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Maximum keywords attached to a chunk
    #[serde(default = "default_keywords_per_chunk")]
    pub keywords_per_chunk: usize,

    /// Metadata extractors to run, in order
    #[serde(default = "default_extractors")]
    pub extractors: Vec<String>,
}

fn default_chunk_size() -> usize {
    1024
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_embedding_dimension() -> usize {
    768
}

fn default_keywords_per_chunk() -> usize {
    10
}

fn default_extractors() -> Vec<String> {
    KNOWN_EXTRACTORS.iter().map(|s| s.to_string()).collect()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedding_dimension: default_embedding_dimension(),
            keywords_per_chunk: default_keywords_per_chunk(),
            extractors: default_extractors(),
        }
    }
}

/// Retry policy applied inside a stage, before it reports to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Additional attempts for retryable collaborator errors
    #[serde(default)]
    pub max_retries: u32,

    /// Base backoff, doubled on every attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl StageConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }
}

/// Batch driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum documents indexed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Render a progress bar while the batch runs
    #[serde(default)]
    pub show_progress: bool,
}

fn default_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            show_progress: false,
        }
    }
}

/// Retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Completed transactions older than this many days are purged
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

fn default_retention_days() -> u32 {
    7
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

/// Audit journal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalConfig {
    /// JSONL file receiving one line per finalized transaction.
    /// Supports ${ENV_VAR} expansion.
    #[serde(default)]
    pub path: Option<String>,
}

impl JournalConfig {
    /// Resolved journal path, if journaling is enabled.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(|p| PathBuf::from(expand_env_vars(p)))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.chunk_size == 0 {
            return Err(ConfigError::Invalid("pipeline.chunk_size must be > 0".into()));
        }
        if p.chunk_overlap >= p.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "pipeline.chunk_overlap ({}) must be smaller than chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }
        if p.embedding_dimension == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.embedding_dimension must be > 0".into(),
            ));
        }
        if let Some(unknown) = p
            .extractors
            .iter()
            .find(|name| !KNOWN_EXTRACTORS.contains(&name.as_str()))
        {
            return Err(ConfigError::Invalid(format!(
                "unknown extractor '{unknown}' (expected one of {KNOWN_EXTRACTORS:?})"
            )));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid("batch.concurrency must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
