//! In-process vector collection.
//!
//! A [`MemoryCollection`] lives for the session unless it is opened on a
//! directory, in which case every mutation rewrites `<dir>/<name>.json`.

use crate::embeddings::cosine_distance;
use crate::traits::VectorIndex;
use crate::{DocumentChunk, RetrievedChunk, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    chunk: DocumentChunk,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionSnapshot {
    name: String,
    dimensions: usize,
    entries: Vec<StoredEntry>,
}

pub struct MemoryCollection {
    name: String,
    dimensions: usize,
    entries: RwLock<Vec<StoredEntry>>,
    snapshot_path: Option<PathBuf>,
    // Taken before the entries guard is released so snapshots land in
    // mutation order.
    write_lock: Mutex<()>,
}

impl MemoryCollection {
    pub fn ephemeral(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions,
            entries: RwLock::new(Vec::new()),
            snapshot_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens (or creates) a collection persisted under `dir`.
    pub fn open(dir: &Path, name: &str, dimensions: usize) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join(format!("{name}.json"));

        let entries = if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)?;
            let snapshot: CollectionSnapshot = serde_json::from_str(&raw)?;
            if snapshot.dimensions != dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: dimensions,
                    actual: snapshot.dimensions,
                });
            }
            info!(
                collection = name,
                path = %snapshot_path.display(),
                entries = snapshot.entries.len(),
                "loaded persisted collection"
            );
            snapshot.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            name: name.to_string(),
            dimensions,
            entries: RwLock::new(entries),
            snapshot_path: Some(snapshot_path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.snapshot_path.is_some()
    }

    fn encode_snapshot(&self, entries: &[StoredEntry]) -> Result<Vec<u8>, StoreError> {
        let snapshot = CollectionSnapshot {
            name: self.name.clone(),
            dimensions: self.dimensions,
            entries: entries.to_vec(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Encodes the entries under the caller's write guard, releases it, then
    /// writes the snapshot to a temporary file and renames it into place.
    async fn persist(
        &self,
        entries: tokio::sync::RwLockWriteGuard<'_, Vec<StoredEntry>>,
    ) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = self.encode_snapshot(&entries)?;
        let count = entries.len();
        let _writing = self.write_lock.lock().await;
        drop(entries);

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), entries = count, "collection snapshot written");
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryCollection {
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

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimensions) {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        let mut entries = self.entries.write().await;
        let mut known: HashSet<&str> = entries.iter().map(|e| e.chunk.chunk_id.as_str()).collect();
        for chunk in chunks {
            if !known.insert(chunk.chunk_id.as_str()) {
                return Err(StoreError::DuplicateId(chunk.chunk_id.clone()));
            }
        }
        drop(known);

        entries.extend(
            chunks
                .iter()
                .cloned()
                .zip(embeddings.iter().cloned())
                .map(|(chunk, embedding)| StoredEntry { chunk, embedding }),
        );
        self.persist(entries).await
    }

    async fn query(
        &self,
        query_vector: &[f32],
        n_results: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        if query_vector.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let entries = self.entries.read().await;
        let mut hits: Vec<RetrievedChunk> = entries
            .iter()
            .map(|entry| RetrievedChunk {
                chunk: entry.chunk.clone(),
                distance: cosine_distance(query_vector, &entry.embedding),
            })
            .collect();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn delete_source(&self, source: &str) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.chunk.source != source);
        let removed = before - entries.len();

        if removed > 0 {
            self.persist(entries).await?;
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().await.len())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<DocumentChunk>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().take(limit).map(|e| e.chunk.clone()).collect())
    }

    async fn sources(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        let mut sources: Vec<String> = Vec::new();
        for entry in entries.iter() {
            if !sources.contains(&entry.chunk.source) {
                sources.push(entry.chunk.source.clone());
            }
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use tempfile::tempdir;

    fn chunks(source: &str, texts: &[&str]) -> Vec<DocumentChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(part, text)| DocumentChunk::new(source, part as u64, text.to_string()))
            .collect()
    }

    fn embed_all(embedder: &CharacterNgramEmbedder, chunks: &[DocumentChunk]) -> Vec<Vec<f32>> {
        chunks.iter().map(|chunk| embedder.embed(&chunk.text)).collect()
    }

    #[tokio::test]
    async fn query_returns_nearest_first() -> Result<(), StoreError> {
        let embedder = CharacterNgramEmbedder::default();
        let collection = MemoryCollection::ephemeral("test", embedder.dimensions());
        let docs = chunks(
            "pump.txt",
            &[
                "The hydraulic pump delivers fluid at constant pressure.",
                "Lunch is served in the cafeteria at noon.",
                "Replace the pump seals when pressure drops.",
            ],
        );
        collection.add(&docs, &embed_all(&embedder, &docs)).await?;

        let hits = collection
            .query(&embedder.embed("hydraulic pump pressure"), 2)
            .await?;

        assert_eq!(hits.len(), 2);
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits.iter().all(|hit| !hit.chunk.text.contains("cafeteria")));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let embedder = CharacterNgramEmbedder::new(16);
        let collection = MemoryCollection::ephemeral("test", 16);
        let docs = chunks("a.txt", &["alpha"]);
        let vectors = embed_all(&embedder, &docs);

        collection.add(&docs, &vectors).await.expect("first add succeeds");
        let second = collection.add(&docs, &vectors).await;

        assert!(matches!(second, Err(StoreError::DuplicateId(id)) if id == "ida.txt.0"));
        assert_eq!(collection.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let collection = MemoryCollection::ephemeral("test", 8);
        let docs = chunks("a.txt", &["alpha"]);

        let result = collection.add(&docs, &[vec![0.0; 4]]).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 8, actual: 4 })
        ));
    }

    #[tokio::test]
    async fn delete_source_only_removes_that_file() -> Result<(), StoreError> {
        let embedder = CharacterNgramEmbedder::new(16);
        let collection = MemoryCollection::ephemeral("test", 16);
        let first = chunks("a.txt", &["one", "two"]);
        let second = chunks("b.txt", &["three"]);
        collection.add(&first, &embed_all(&embedder, &first)).await?;
        collection.add(&second, &embed_all(&embedder, &second)).await?;

        assert_eq!(collection.delete_source("a.txt").await?, 2);
        assert_eq!(collection.delete_source("missing.txt").await?, 0);
        assert_eq!(collection.count().await?, 1);
        assert_eq!(collection.sources().await?, vec!["b.txt"]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_all_reach_the_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::new(16);
        let collection = std::sync::Arc::new(MemoryCollection::open(dir.path(), "shared", 16)?);

        let mut tasks = Vec::new();
        for file in 0..8 {
            let collection = collection.clone();
            let docs = chunks(&format!("file{file}.txt"), &["alpha", "beta"]);
            let vectors = embed_all(&embedder, &docs);
            tasks.push(tokio::spawn(async move { collection.add(&docs, &vectors).await }));
        }
        for task in tasks {
            task.await??;
        }
        collection.delete_source("file3.txt").await?;

        let reopened = MemoryCollection::open(dir.path(), "shared", 16)?;
        assert_eq!(reopened.count().await?, 14);
        assert!(!reopened.sources().await?.contains(&"file3.txt".to_string()));
        assert!(!dir.path().join("shared.json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn persistent_collection_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = CharacterNgramEmbedder::new(16);
        let docs = chunks("notes.txt", &["first note", "second note"]);

        {
            let collection = MemoryCollection::open(dir.path(), "my_collection", 16)?;
            assert!(collection.is_persistent());
            collection.add(&docs, &embed_all(&embedder, &docs)).await?;
        }

        let reopened = MemoryCollection::open(dir.path(), "my_collection", 16)?;
        assert_eq!(reopened.count().await?, 2);
        assert_eq!(reopened.peek(1).await?[0].chunk_id, "idnotes.txt.0");

        let wrong_dims = MemoryCollection::open(dir.path(), "my_collection", 32);
        assert!(matches!(
            wrong_dims,
            Err(StoreError::DimensionMismatch { expected: 32, actual: 16 })
        ));
        Ok(())
    }
}
