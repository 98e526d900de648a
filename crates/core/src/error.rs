use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("text is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unsupported file type: {name} type:{mime}")]
    UnsupportedType { name: String, mime: String },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no content extracted from {0}")]
    NoContent(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk id already present in collection: {0}")]
    DuplicateId(String),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{backend} returned {status}: {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("request timed out after {0}s; try reducing prompt length or max_tokens")]
    Timeout(u64),

    #[error("job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("response is missing field: {0}")]
    MissingField(&'static str),

    #[error("empty prompt provided")]
    EmptyPrompt,

    #[error("no model backend available: {0}")]
    NotConfigured(String),

    #[error("could not parse JSON output: {0}")]
    JsonOutput(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("config error: {0}")]
    Config(String),

    #[error("please enter a question")]
    EmptyQuestion,
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
