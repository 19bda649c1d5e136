//! Reference text collaborators: preprocessing, chunking and heuristic
//! metadata extraction.
//!
//! These are deterministic and dependency-free stand-ins for model-backed
//! components. They are good enough to drive the pipeline end to end.

use crate::backend::{Chunker, MetadataExtractor, Preprocessor};
use crate::models::{
    Chunk, Document, IndexError, PipelineConfig, PreparedDocument, Result,
};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Words ignored by keyword and entity extraction.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "is", "it", "its", "not", "of", "on", "or", "she", "that", "the",
    "their", "there", "they", "this", "to", "was", "were", "which", "will", "with", "we", "you",
];

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| IndexError::Internal(format!("invalid pattern {pattern}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// Preprocessing
// ═══════════════════════════════════════════════════════════════════════════

/// Normalizes whitespace and fills in standard metadata.
pub struct DefaultPreprocessor {
    inline_space: Regex,
    blank_lines: Regex,
}

impl DefaultPreprocessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inline_space: compile(r"[ \t\r\f\v]+")?,
            blank_lines: compile(r"\n{3,}")?,
        })
    }

    fn normalize(&self, text: &str) -> String {
        let collapsed = self.inline_space.replace_all(text, " ");
        let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
        let joined = lines.join("\n");
        self.blank_lines.replace_all(joined.trim(), "\n\n").into_owned()
    }
}

#[async_trait]
impl Preprocessor for DefaultPreprocessor {
    fn validate(&self, document: &Document) -> Result<()> {
        if document.text.trim().is_empty() {
            return Err(IndexError::Validation("document text is empty".to_string()));
        }
        match document.metadata.get("doc_id") {
            None => Ok(()),
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(()),
            Some(other) => Err(IndexError::Validation(format!(
                "doc_id must be a non-empty string, got {other}"
            ))),
        }
    }

    async fn preprocess(
        &self,
        document: Document,
        transaction_id: &str,
    ) -> Result<PreparedDocument> {
        let Document { text, mut metadata } = document;

        let doc_id = match metadata.get("doc_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        metadata.insert("doc_id".into(), json!(doc_id));
        metadata.insert("indexed_at".into(), json!(Utc::now().to_rfc3339()));
        metadata.insert("transaction_id".into(), json!(transaction_id));
        for (key, default) in [
            ("title", json!("Untitled")),
            ("author", json!("Unknown")),
            ("source", json!("Unknown")),
            ("tags", json!([])),
        ] {
            metadata.entry(key).or_insert(default);
        }

        Ok(PreparedDocument {
            doc_id,
            text: self.normalize(&text),
            metadata,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Chunking
// ═══════════════════════════════════════════════════════════════════════════

/// Packs whole sentences into chunks of at most `chunk_size` characters,
/// repeating up to `chunk_overlap` characters of trailing sentences at the
/// start of the next chunk. Sentences longer than a chunk are hard-split.
pub struct SentenceChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    sentence_end: Regex,
}

impl SentenceChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(IndexError::Internal(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            sentence_end: compile(r"[.!?]+\s+|\n\n+")?,
        })
    }

    /// Split into sentences, each no longer than `chunk_size` characters.
    fn sentences(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut start = 0;
        for m in self.sentence_end.find_iter(text) {
            pieces.push(&text[start..m.end()]);
            start = m.end();
        }
        if start < text.len() {
            pieces.push(&text[start..]);
        }

        let mut sentences = Vec::new();
        for piece in pieces {
            let chars: Vec<char> = piece.chars().collect();
            if chars.len() <= self.chunk_size {
                sentences.push(piece.to_string());
            } else {
                sentences.extend(
                    chars
                        .chunks(self.chunk_size)
                        .map(|part| part.iter().collect::<String>()),
                );
            }
        }
        sentences
    }

    /// Split text into chunk strings.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0;
        let mut has_new_content = false;

        for sentence in self.sentences(text) {
            let len = sentence.chars().count();
            if current_len + len > self.chunk_size && !current.is_empty() {
                if has_new_content {
                    chunks.push(current.concat());
                    has_new_content = false;
                }

                let mut carried = Vec::new();
                let mut carried_len = 0;
                for previous in current.iter().rev() {
                    let previous_len = previous.chars().count();
                    if carried_len + previous_len > self.chunk_overlap {
                        break;
                    }
                    carried_len += previous_len;
                    carried.push(previous.clone());
                }
                carried.reverse();
                current = carried;
                current_len = carried_len;

                if current_len + len > self.chunk_size {
                    current.clear();
                    current_len = 0;
                }
            }
            current.push(sentence);
            current_len += len;
            has_new_content = true;
        }
        if has_new_content {
            chunks.push(current.concat());
        }

        chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[async_trait]
impl Chunker for SentenceChunker {
    async fn chunk(&self, document: &PreparedDocument) -> Result<Vec<Chunk>> {
        Ok(self
            .split(&document.text)
            .into_iter()
            .enumerate()
            .map(|(position, content)| {
                let chunk_id = Uuid::new_v4().to_string();
                let mut metadata = document.metadata.clone();
                metadata.insert("doc_id".into(), json!(document.doc_id));
                metadata.insert("chunk_id".into(), json!(chunk_id));
                metadata.insert("position".into(), json!(position));
                Chunk {
                    chunk_id,
                    doc_id: document.doc_id.clone(),
                    content,
                    position,
                    metadata,
                    embedding: None,
                }
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Metadata extraction
// ═══════════════════════════════════════════════════════════════════════════

fn first_sentence(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .find(|&(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    text[..end].trim().chars().take(max_chars).collect()
}

/// Sets `document_title` on every chunk: the document's own title when it has
/// one, otherwise the first sentence of the first chunk.
pub struct TitleExtractor;

#[async_trait]
impl MetadataExtractor for TitleExtractor {
    fn name(&self) -> &str {
        "title"
    }

    async fn extract(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let Some(first) = chunks.first() else {
            return Ok(chunks);
        };

        let title = match first.metadata.get("title").and_then(Value::as_str) {
            Some(t) if !t.is_empty() && t != "Untitled" => t.to_string(),
            _ => first_sentence(&first.content, 80),
        };

        for chunk in &mut chunks {
            chunk.metadata.insert("document_title".into(), json!(title));
        }
        Ok(chunks)
    }
}

/// Most frequent non-stopword terms per chunk.
pub struct KeywordExtractor {
    keywords: usize,
    word: Regex,
}

impl KeywordExtractor {
    pub fn new(keywords: usize) -> Result<Self> {
        Ok(Self {
            keywords,
            word: compile(r"[A-Za-z][A-Za-z'-]{2,}")?,
        })
    }

    fn keywords_for(&self, text: &str) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for m in self.word.find_iter(text) {
            let word = m.as_str().to_lowercase();
            if !STOPWORDS.contains(&word.as_str()) {
                *counts.entry(word).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.keywords)
            .map(|(word, _)| word)
            .collect()
    }
}

#[async_trait]
impl MetadataExtractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn extract(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        for chunk in &mut chunks {
            let keywords = self.keywords_for(&chunk.content);
            chunk.metadata.insert("keywords".into(), json!(keywords));
        }
        Ok(chunks)
    }
}

/// Extractive summary of each chunk and of the chunk before it.
pub struct SummaryExtractor;

#[async_trait]
impl MetadataExtractor for SummaryExtractor {
    fn name(&self) -> &str {
        "summary"
    }

    async fn extract(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let summaries: Vec<String> = chunks
            .iter()
            .map(|c| first_sentence(&c.content, 200))
            .collect();

        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk
                .metadata
                .insert("section_summary".into(), json!(summaries[i]));
            if i > 0 {
                chunk
                    .metadata
                    .insert("prev_section_summary".into(), json!(summaries[i - 1]));
            }
        }
        Ok(chunks)
    }
}

/// Capitalized phrases, treated as named entities.
pub struct EntityExtractor {
    phrase: Regex,
}

impl EntityExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            phrase: compile(r"\b[A-Z][a-zA-Z0-9]+(?:\s+[A-Z][a-zA-Z0-9]+)*\b")?,
        })
    }

    fn entities_for(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.phrase
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|e| !STOPWORDS.contains(&e.to_lowercase().as_str()))
            .filter(|e| seen.insert(e.clone()))
            .collect()
    }
}

#[async_trait]
impl MetadataExtractor for EntityExtractor {
    fn name(&self) -> &str {
        "entities"
    }

    async fn extract(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        for chunk in &mut chunks {
            let entities = self.entities_for(&chunk.content);
            chunk.metadata.insert("entities".into(), json!(entities));
        }
        Ok(chunks)
    }
}

/// Build the configured extractors, in configuration order.
pub fn extractors_from_config(config: &PipelineConfig) -> Result<Vec<Arc<dyn MetadataExtractor>>> {
    config
        .extractors
        .iter()
        .map(|name| -> Result<Arc<dyn MetadataExtractor>> {
            match name.as_str() {
                "title" => Ok(Arc::new(TitleExtractor)),
                "keywords" => Ok(Arc::new(KeywordExtractor::new(config.keywords_per_chunk)?)),
                "summary" => Ok(Arc::new(SummaryExtractor)),
                "entities" => Ok(Arc::new(EntityExtractor::new()?)),
                other => Err(IndexError::Internal(format!("unknown extractor '{other}'"))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn prepared(text: &str) -> PreparedDocument {
        let mut metadata = Map::new();
        metadata.insert("title".into(), json!("Untitled"));
        PreparedDocument {
            doc_id: "doc-1".into(),
            text: text.into(),
            metadata,
        }
    }

    #[test]
    fn test_validate_rejects_blank_text_and_bad_id() {
        let pre = DefaultPreprocessor::new().unwrap();
        assert!(pre.validate(&Document::new("   \n")).is_err());
        assert!(pre
            .validate(&Document::new("text").with_metadata("doc_id", 42))
            .is_err());
        assert!(pre
            .validate(&Document::new("text").with_metadata("doc_id", "d1"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_preprocess_fills_defaults_and_keeps_doc_id() {
        let pre = DefaultPreprocessor::new().unwrap();
        let doc = Document::new("  Hello\t\tworld.  \n\n\n\nBye. ")
            .with_metadata("doc_id", "d1")
            .with_metadata("author", "Ada");

        let prepared = pre.preprocess(doc, "tx-1").await.unwrap();
        assert_eq!(prepared.doc_id, "d1");
        assert_eq!(prepared.text, "Hello world.\n\nBye.");
        assert_eq!(prepared.metadata["author"], "Ada");
        assert_eq!(prepared.metadata["title"], "Untitled");
        assert_eq!(prepared.metadata["source"], "Unknown");
        assert_eq!(prepared.metadata["tags"], json!([]));
        assert_eq!(prepared.metadata["transaction_id"], "tx-1");
        assert!(prepared.metadata.contains_key("indexed_at"));
    }

    #[tokio::test]
    async fn test_preprocess_assigns_doc_id() {
        let pre = DefaultPreprocessor::new().unwrap();
        let prepared = pre.preprocess(Document::new("text"), "tx").await.unwrap();
        assert!(Uuid::parse_str(&prepared.doc_id).is_ok());
        assert_eq!(prepared.metadata["doc_id"], json!(prepared.doc_id));
    }

    #[test]
    fn test_chunker_rejects_overlap_not_below_size() {
        assert!(SentenceChunker::new(100, 100).is_err());
        assert!(SentenceChunker::new(0, 0).is_err());
    }

    #[test]
    fn test_chunker_packs_sentences() {
        let chunker = SentenceChunker::new(30, 0).unwrap();
        let chunks = chunker.split("One two three. Four five six. Seven eight nine.");
        assert_eq!(
            chunks,
            vec!["One two three. Four five six.", "Seven eight nine."]
        );
    }

    #[test]
    fn test_chunker_overlap_repeats_trailing_sentence() {
        let chunker = SentenceChunker::new(30, 15).unwrap();
        let chunks = chunker.split("Alpha beta. Gamma delta. Epsilon zeta.");
        assert_eq!(chunks, vec!["Alpha beta. Gamma delta.", "Gamma delta. Epsilon zeta."]);
    }

    #[test]
    fn test_chunker_hard_splits_long_sentence() {
        let chunker = SentenceChunker::new(10, 0).unwrap();
        let chunks = chunker.split(&"x".repeat(25));
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[tokio::test]
    async fn test_chunks_carry_ids_and_positions() {
        let chunker = SentenceChunker::new(25, 0).unwrap();
        let chunks = chunker
            .chunk(&prepared("First sentence here. Second sentence here."))
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].position, 1);
        assert_eq!(chunks[1].doc_id, "doc-1");
        assert_eq!(chunks[0].metadata["chunk_id"], json!(chunks[0].chunk_id));
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
    }

    #[tokio::test]
    async fn test_extractors_annotate_chunks() {
        let chunker = SentenceChunker::new(1000, 0).unwrap();
        let chunks = chunker
            .chunk(&prepared(
                "Marie Curie worked in Paris. Radium research made Marie Curie famous.",
            ))
            .await
            .unwrap();

        let chunks = TitleExtractor.extract(chunks).await.unwrap();
        let chunks = KeywordExtractor::new(3)
            .unwrap()
            .extract(chunks)
            .await
            .unwrap();
        let chunks = SummaryExtractor.extract(chunks).await.unwrap();
        let chunks = EntityExtractor::new().unwrap().extract(chunks).await.unwrap();

        let meta = &chunks[0].metadata;
        assert_eq!(meta["document_title"], "Marie Curie worked in Paris.");
        assert_eq!(meta["keywords"], json!(["curie", "marie", "famous"]));
        assert_eq!(meta["section_summary"], "Marie Curie worked in Paris.");
        assert_eq!(chunks[0].entities(), vec!["Marie Curie", "Paris", "Radium"]);
    }

    #[test]
    fn test_extractors_from_config_respects_order() {
        let config = PipelineConfig {
            extractors: vec!["entities".into(), "title".into()],
            ..Default::default()
        };
        let extractors = extractors_from_config(&config).unwrap();
        let names: Vec<_> = extractors.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["entities", "title"]);
    }
}
