use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PlainText,
    Pdf,
}

impl DocumentKind {
    pub fn mime(&self) -> &'static str {
        match self {
            DocumentKind::PlainText => "text/plain",
            DocumentKind::Pdf => "application/pdf",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub file_name: String,
    pub kind: DocumentKind,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub source: String,
    pub part: u64,
    pub text: String,
}

impl DocumentChunk {
    pub fn new(source: &str, part: u64, text: String) -> Self {
        Self {
            chunk_id: chunk_id(source, part),
            source: source.to_string(),
            part,
            text,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

pub fn chunk_id(source: &str, part: u64) -> String {
    format!("id{source}.{part}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Lines are grouped into paragraphs at blank lines.
    #[default]
    Lines,
    /// Paragraphs are split on literal double newlines.
    Paragraphs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingOptions {
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default)]
    pub strategy: ChunkStrategy,
}

fn default_max_words() -> usize {
    200
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            strategy: ChunkStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub text: String,
    pub n_results: usize,
    pub similarity_threshold: Option<f32>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, n_results: usize) -> Self {
        Self {
            text: text.into(),
            n_results,
            similarity_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    /// Cosine distance to the query vector, lower is closer.
    pub distance: f32,
}

impl RetrievedChunk {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub chunks: Vec<RetrievedChunk>,
    pub text: String,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for hit in &self.chunks {
            if !sources.contains(&hit.chunk.source) {
                sources.push(hit.chunk.source.clone());
            }
        }
        sources
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
}

fn default_max_tokens() -> u32 {
    200
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: None,
            top_k: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub question: String,
    pub prompt: String,
    pub context: RetrievedContext,
    pub response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_carry_source_and_part() {
        let chunk = DocumentChunk::new("notes.txt", 3, "some words here".to_string());
        assert_eq!(chunk.chunk_id, "idnotes.txt.3");
        assert_eq!(chunk.word_count(), 3);
    }

    #[test]
    fn context_sources_are_unique_in_hit_order() {
        let context = RetrievedContext {
            chunks: vec![
                RetrievedChunk {
                    chunk: DocumentChunk::new("b.pdf", 0, "x".to_string()),
                    distance: 0.1,
                },
                RetrievedChunk {
                    chunk: DocumentChunk::new("a.txt", 2, "y".to_string()),
                    distance: 0.2,
                },
                RetrievedChunk {
                    chunk: DocumentChunk::new("b.pdf", 1, "z".to_string()),
                    distance: 0.3,
                },
            ],
            text: String::new(),
        };

        assert_eq!(context.sources(), vec!["b.pdf", "a.txt"]);
    }
}
