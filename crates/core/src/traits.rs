use crate::{DocumentChunk, GenerationParams, InferenceError, RetrievedChunk, StoreError};
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex {
    async fn add(&self, chunks: &[DocumentChunk], embeddings: &[Vec<f32>])
        -> Result<(), StoreError>;

    /// Nearest chunks first, at most `n_results`.
    async fn query(
        &self,
        query_vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn peek(&self, limit: usize) -> Result<Vec<DocumentChunk>, StoreError>;

    async fn sources(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait TextGenerator {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError>;
}
