use crate::error::IngestError;
use crate::models::{ChunkStrategy, ChunkingOptions, DocumentChunk, DocumentFingerprint};
use unicode_segmentation::UnicodeSegmentation;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Groups stripped lines into paragraphs; a blank line closes the current one.
pub fn group_line_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs
}

pub fn split_blank_line_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|paragraph| paragraph.trim().to_string())
        .filter(|paragraph| !paragraph.is_empty())
        .collect()
}

/// Greedy sentence packing. A chunk only exceeds `max_words` when it holds a
/// single sentence that is longer than the limit on its own.
pub fn pack_sentences(paragraph: &str, max_words: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for sentence in split_sentences(paragraph) {
        let sentence_words = sentence.split_whitespace().count();

        if current_words + sentence_words <= max_words {
            current.push(sentence);
            current_words += sentence_words;
            continue;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        current = vec![sentence];
        current_words = sentence_words;
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

pub fn chunk_text(text: &str, options: &ChunkingOptions) -> Result<Vec<String>, IngestError> {
    if options.max_words == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "max_words must be greater than zero".to_string(),
        ));
    }

    let paragraphs = match options.strategy {
        ChunkStrategy::Lines => group_line_paragraphs(text),
        ChunkStrategy::Paragraphs => split_blank_line_paragraphs(text),
    };

    let mut chunks = Vec::new();
    for paragraph in paragraphs {
        if paragraph.split_whitespace().count() <= options.max_words {
            chunks.push(normalize_whitespace(&paragraph));
        } else {
            chunks.extend(
                pack_sentences(&paragraph, options.max_words)
                    .iter()
                    .map(|chunk| normalize_whitespace(chunk)),
            );
        }
    }

    Ok(chunks)
}

pub fn build_chunks(
    document: &DocumentFingerprint,
    text: &str,
    options: &ChunkingOptions,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let chunks = chunk_text(text, options)?
        .into_iter()
        .enumerate()
        .map(|(part, raw)| DocumentChunk::new(&document.file_name, part as u64, raw))
        .collect();

    Ok(chunks)
}
