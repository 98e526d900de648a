pub mod backends;
pub mod chunking;
pub mod collection;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod registry;
pub mod retrieval;
pub mod session;
pub mod stores;
pub mod traits;

pub use backends::{Backend, JobState, JobStatus, OllamaClient, RunpodClient, RunpodConfig};
pub use chunking::{
    build_chunks, chunk_text, group_line_paragraphs, normalize_whitespace, pack_sentences,
    split_blank_line_paragraphs, split_sentences,
};
pub use collection::MemoryCollection;
pub use config::{BackendKind, RagConfig};
pub use embeddings::{
    cosine_distance, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, InferenceError, RagError, StoreError};
pub use extractor::{detect_kind, extract_document_text, LopdfExtractor, PageText, PdfExtractor};
pub use ingest::{digest_bytes, discover_documents, ingest_document, read_upload, Upload};
pub use models::{
    chunk_id, Answer, ChatMessage, ChunkStrategy, ChunkingOptions, DocumentChunk, DocumentFingerprint,
    DocumentKind, GenerationParams, RetrievalQuery, RetrievedChunk, RetrievedContext,
};
pub use prompt::{clean_and_parse_json, contextual_prompt, format_messages_as_prompt};
pub use registry::UploadRegistry;
pub use retrieval::get_relevant_text;
pub use session::{IngestedFile, RagSession, SessionOptions, SkippedFile, SyncReport};
pub use stores::QdrantStore;
pub use traits::{TextGenerator, VectorIndex};
