use crate::traits::VectorIndex;
use crate::{DocumentChunk, RetrievedChunk, StoreError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>, vector_size: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => return Err(backend_error(status)),
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(format!("{}/{}", self.collection_url(), path))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(response.json().await?)
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

/// Qdrant only accepts integers or UUIDs as point ids.
fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn chunk_from_payload(payload: Option<&Value>) -> DocumentChunk {
    let field = |name: &str| {
        payload
            .and_then(|p| p.get(name))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let part = payload
        .and_then(|p| p.get("part"))
        .and_then(Value::as_u64)
        .unwrap_or_default();

    DocumentChunk {
        chunk_id: field("chunk_id"),
        source: field("source"),
        part,
        text: field("text"),
    }
}

fn source_filter(source: &str) -> Value {
    json!({ "must": [{ "key": "source", "match": { "value": source } }] })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add(
        &self,
        chunks: &[DocumentChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.vector_size,
                        actual: embedding.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(&chunk.chunk_id),
                    "vector": embedding,
                    "payload": {
                        "chunk_id": chunk.chunk_id,
                        "source": chunk.source,
                        "part": chunk.part,
                        "text": chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        debug!(collection = %self.collection, points = chunks.len(), "upserted points");
        Ok(())
    }

    async fn query(
        &self,
        query_vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        let parsed = self
            .post(
                "points/search",
                json!({
                    "vector": query_vector,
                    "limit": n_results,
                    "with_payload": true,
                }),
            )
            .await?;

        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
                RetrievedChunk {
                    chunk: chunk_from_payload(hit.get("payload")),
                    distance: 1.0 - score as f32,
                }
            })
            .collect())
    }

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError> {
        let existing = self
            .post(
                "points/count",
                json!({ "filter": source_filter(source), "exact": true }),
            )
            .await?
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        if existing == 0 {
            return Ok(0);
        }

        self.post(
            "points/delete?wait=true",
            json!({ "filter": source_filter(source) }),
        )
        .await?;
        Ok(existing)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let parsed = self.post("points/count", json!({ "exact": true })).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response without result.count".to_string(),
            })
    }

    async fn peek(&self, limit: usize) -> Result<Vec<DocumentChunk>, StoreError> {
        let parsed = self
            .post(
                "points/scroll",
                json!({ "limit": limit, "with_payload": true, "with_vector": false }),
            )
            .await?;

        Ok(parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .map(|point| chunk_from_payload(point.get("payload")))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn sources(&self) -> Result<Vec<String>, StoreError> {
        let parsed = self
            .post(
                "points/scroll",
                json!({
                    "limit": 10_000,
                    "with_payload": ["source"],
                    "with_vector": false,
                }),
            )
            .await?;

        let mut sources: Vec<String> = Vec::new();
        for point in parsed
            .pointer("/result/points")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(source) = point.pointer("/payload/source").and_then(Value::as_str) {
                if !sources.iter().any(|known| known == source) {
                    sources.push(source.to_string());
                }
            }
        }
        Ok(sources)
    }
}
