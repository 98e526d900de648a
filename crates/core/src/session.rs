use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::ingest::{ingest_document, Upload};
use crate::registry::UploadRegistry;
use crate::traits::{TextGenerator, VectorIndex};
use crate::{
    contextual_prompt, detect_kind, digest_bytes, get_relevant_text, Answer, ChunkingOptions,
    DocumentChunk, GenerationParams, RagError, RetrievalQuery,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chunking: ChunkingOptions,
    pub n_results: usize,
    pub similarity_threshold: Option<f32>,
    pub generation: GenerationParams,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingOptions::default(),
            n_results: 2,
            similarity_threshold: None,
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedFile {
    pub name: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub ingested: Vec<IngestedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// One user's working state: staged uploads, the collection they feed, and
/// the model questions are forwarded to.
pub struct RagSession<V, G>
where
    V: VectorIndex,
    G: TextGenerator,
{
    index: V,
    generator: G,
    embedder: CharacterNgramEmbedder,
    registry: UploadRegistry,
    staged: Vec<Upload>,
    checksums: HashMap<String, String>,
    options: SessionOptions,
}

impl<V, G> RagSession<V, G>
where
    V: VectorIndex + Send + Sync,
    G: TextGenerator + Send + Sync,
{
    pub fn new(
        index: V,
        generator: G,
        embedder: CharacterNgramEmbedder,
        registry: UploadRegistry,
        options: SessionOptions,
    ) -> Self {
        Self {
            index,
            generator,
            embedder,
            registry,
            staged: Vec::new(),
            checksums: HashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut SessionOptions {
        &mut self.options
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Stages a file for the next [`sync_collection`](Self::sync_collection).
    /// Returns `false` when a file with the same name is already staged or
    /// ingested; its content is not compared beyond a logged checksum check.
    pub fn stage_upload(&mut self, upload: Upload) -> Result<bool, RagError> {
        UploadRegistry::validate_name(&upload.name)?;
        detect_kind(&upload.name)?;

        if self.registry.contains(&upload.name) {
            let checksum = digest_bytes(&upload.bytes);
            if let Some(known) = self.checksums.get(&upload.name) {
                if *known != checksum {
                    warn!(file = %upload.name, "content changed under an already ingested name; keeping the old chunks");
                }
            }
            return Ok(false);
        }
        if self.staged.iter().any(|staged| staged.name == upload.name) {
            return Ok(false);
        }

        info!(file = %upload.name, bytes = upload.bytes.len(), "staged upload");
        self.staged.push(upload);
        Ok(true)
    }

    pub fn pending_uploads(&self) -> Vec<&str> {
        self.staged.iter().map(|upload| upload.name.as_str()).collect()
    }

    pub fn files(&self) -> &[String] {
        self.registry.names()
    }

    pub async fn collection_count(&self) -> Result<usize, RagError> {
        Ok(self.index.count().await?)
    }

    pub async fn preview(&self, limit: usize) -> Result<Vec<DocumentChunk>, RagError> {
        Ok(self.index.peek(limit).await?)
    }

    /// Ingests every staged upload. Per-file failures are reported, not
    /// propagated, and the failed file leaves the staging list.
    pub async fn sync_collection(&mut self) -> SyncReport {
        let mut report = SyncReport::default();

        for upload in std::mem::take(&mut self.staged) {
            match self.ingest_upload(&upload).await {
                Ok(chunk_count) => {
                    info!(file = %upload.name, chunk_count, "added chunks");
                    report.ingested.push(IngestedFile {
                        name: upload.name,
                        chunk_count,
                    });
                }
                Err(error) => {
                    warn!(file = %upload.name, %error, "error processing upload");
                    report.skipped.push(SkippedFile {
                        name: upload.name,
                        reason: error.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn ingest_upload(&mut self, upload: &Upload) -> Result<usize, RagError> {
        let (document, chunks) =
            ingest_document(&upload.name, &upload.bytes, &self.options.chunking)?;
        let texts = chunks.iter().map(|chunk| chunk.text.as_str()).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts);

        self.index.add(&chunks, &embeddings).await?;
        if let Err(error) = self.registry.insert(&document.file_name) {
            // Chunks without a recorded name could never be re-ingested.
            if let Err(rollback) = self.index.delete_source(&document.file_name).await {
                warn!(file = %document.file_name, %rollback, "could not roll back chunks");
            }
            return Err(error.into());
        }
        self.checksums.insert(document.file_name, document.checksum);
        Ok(chunks.len())
    }

    /// Deletes a file's chunks and forgets it. Returns the number of chunks
    /// removed.
    pub async fn remove_file(&mut self, name: &str) -> Result<usize, RagError> {
        let removed = self.index.delete_source(name).await?;
        self.registry.remove(name)?;
        self.staged.retain(|upload| upload.name != name);
        self.checksums.remove(name);
        info!(file = name, removed, "removed file from collection");
        Ok(removed)
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, RagError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        if self.index.count().await? == 0 {
            warn!("no knowledge base available; generating from the prompt alone");
        }

        let query = RetrievalQuery {
            text: question.to_string(),
            n_results: self.options.n_results,
            similarity_threshold: self.options.similarity_threshold,
        };
        let context = get_relevant_text(&self.index, &self.embedder, &query).await?;
        debug!(chunks = context.chunks.len(), "relevant text retrieved");

        let prompt = contextual_prompt(question, &context.text);
        let response = self
            .generator
            .generate(&prompt, &self.options.generation)
            .await?;

        Ok(Answer {
            question: question.to_string(),
            prompt,
            context,
            response,
        })
    }
}
