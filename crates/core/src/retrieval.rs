use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{RetrievalQuery, RetrievedContext, StoreError};
use tracing::debug;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Retrieves the chunks closest to `query.text` and joins their text.
///
/// `n_results` is clamped to the collection size, so an empty collection
/// yields an empty context rather than an error.
pub async fn get_relevant_text<V, E>(
    index: &V,
    embedder: &E,
    query: &RetrievalQuery,
) -> Result<RetrievedContext, StoreError>
where
    V: VectorIndex + Sync + ?Sized,
    E: Embedder + ?Sized,
{
    let available = index.count().await?;
    let n_results = query.n_results.min(available);
    if n_results == 0 {
        return Ok(RetrievedContext::default());
    }

    let query_vector = embedder.embed(&query.text);
    let mut hits = index.query(&query_vector, n_results).await?;

    if let Some(threshold) = query.similarity_threshold {
        hits.retain(|hit| hit.similarity() >= threshold);
    }

    let text = hits
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    debug!(
        requested = query.n_results,
        returned = hits.len(),
        context_chars = text.len(),
        "retrieved context"
    );

    Ok(RetrievedContext { chunks: hits, text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::DocumentChunk;

    async fn seeded(embedder: &CharacterNgramEmbedder) -> MemoryCollection {
        let collection = MemoryCollection::ephemeral("test", embedder.dimensions());
        let chunks = vec![
            DocumentChunk::new("care.txt", 0, "Water the ferns twice a week.".to_string()),
            DocumentChunk::new("care.txt", 1, "Ferns prefer indirect light.".to_string()),
            DocumentChunk::new("tax.txt", 0, "Invoices are due within thirty days.".to_string()),
        ];
        let vectors = chunks.iter().map(|c| embedder.embed(&c.text)).collect::<Vec<_>>();
        collection
            .add(&chunks, &vectors)
            .await
            .expect("seeding should succeed");
        collection
    }

    #[tokio::test]
    async fn empty_collection_yields_empty_context() {
        let embedder = CharacterNgramEmbedder::default();
        let collection = MemoryCollection::ephemeral("empty", embedder.dimensions());

        let context = get_relevant_text(&collection, &embedder, &RetrievalQuery::new("ferns", 3))
            .await
            .expect("retrieval should succeed");

        assert!(context.is_empty());
        assert!(context.text.is_empty());
    }

    #[tokio::test]
    async fn result_count_is_clamped_to_collection_size() {
        let embedder = CharacterNgramEmbedder::default();
        let collection = seeded(&embedder).await;

        let context = get_relevant_text(
            &collection,
            &embedder,
            &RetrievalQuery::new("how often do ferns need water", 10),
        )
        .await
        .expect("retrieval should succeed");

        assert_eq!(context.chunks.len(), 3);
        assert_eq!(context.text.matches(CONTEXT_SEPARATOR).count(), 2);
    }

    #[tokio::test]
    async fn similarity_threshold_drops_distant_chunks() {
        let embedder = CharacterNgramEmbedder::default();
        let collection = seeded(&embedder).await;

        let mut query = RetrievalQuery::new("Water the ferns twice a week.", 3);
        query.similarity_threshold = Some(0.99);

        let context = get_relevant_text(&collection, &embedder, &query)
            .await
            .expect("retrieval should succeed");

        assert_eq!(context.chunks.len(), 1);
        assert_eq!(context.text, "Water the ferns twice a week.");
        assert_eq!(context.sources(), vec!["care.txt"]);
    }
}
