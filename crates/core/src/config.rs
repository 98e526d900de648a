//! Application settings.
//!
//! Every field has a default, so an absent or partial TOML file is valid.
//! `RUNPOD_ENDPOINT` overrides the configured endpoint; the API key is always
//! read from the environment variable named by `backend.runpod.api_key_env`.

use crate::backends::{Backend, OllamaClient, RunpodClient, RunpodConfig, DEFAULT_OLLAMA_URL};
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::session::SessionOptions;
use crate::{ChunkingOptions, GenerationParams, RagError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const RUNPOD_ENDPOINT_ENV: &str = "RUNPOD_ENDPOINT";
pub const REGISTRY_FILE_NAME: &str = "uploaded_files.txt";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Directory for the collection snapshot and upload log. `None` keeps the
    /// collection in memory for the lifetime of the process.
    #[serde(default)]
    pub persist_dir: Option<PathBuf>,

    /// Use a Qdrant server instead of the built-in collection.
    #[serde(default)]
    pub qdrant_url: Option<String>,

    #[serde(default)]
    pub chunking: ChunkingOptions,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub generation: GenerationParams,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Runpod,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub runpod: RunpodSettings,
    #[serde(default)]
    pub ollama: OllamaSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunpodSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_collection_name() -> String {
    "my_collection".to_string()
}

fn default_embedding_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

fn default_n_results() -> usize {
    2
}

fn default_api_key_env() -> String {
    "RUNPOD_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    65
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_wait_secs() -> u64 {
    600
}

fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_ollama_model() -> String {
    "mistral".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection_name: default_collection_name(),
            embedding_dimensions: default_embedding_dimensions(),
            persist_dir: None,
            qdrant_url: None,
            chunking: ChunkingOptions::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationParams::default(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: default_n_results(),
            similarity_threshold: None,
        }
    }
}

impl Default for RunpodSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RagConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, RagError> {
        toml::from_str(raw).map_err(|error| RagError::Config(error.to_string()))
    }

    /// Loads `path` when given, otherwise starts from defaults, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RagError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| {
                    RagError::Config(format!("cannot read {}: {error}", path.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(endpoint) = non_empty_env(RUNPOD_ENDPOINT_ENV) {
            self.backend.runpod.endpoint = Some(endpoint);
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.embedding_dimensions == 0 {
            return Err(RagError::Config(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if self.chunking.max_words == 0 {
            return Err(RagError::Config(
                "chunking.max_words must be greater than zero".to_string(),
            ));
        }
        if let Some(threshold) = self.retrieval.similarity_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(RagError::Config(format!(
                    "retrieval.similarity_threshold {threshold} is outside [-1, 1]"
                )));
            }
        }
        Ok(())
    }

    pub fn registry_path(&self) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(REGISTRY_FILE_NAME))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunking: self.chunking.clone(),
            n_results: self.retrieval.n_results,
            similarity_threshold: self.retrieval.similarity_threshold,
            generation: self.generation.clone(),
        }
    }

    pub fn runpod_config(&self) -> Result<RunpodConfig, RagError> {
        let settings = &self.backend.runpod;
        let endpoint = settings.endpoint.clone().ok_or_else(|| {
            RagError::Config(format!(
                "no RunPod endpoint configured; set {RUNPOD_ENDPOINT_ENV}"
            ))
        })?;

        let mut config = RunpodConfig::new(endpoint, non_empty_env(&settings.api_key_env));
        config.request_timeout = Duration::from_secs(settings.request_timeout_secs);
        config.poll_interval = Duration::from_secs(settings.poll_interval_secs);
        config.max_wait = Duration::from_secs(settings.max_wait_secs);
        Ok(config)
    }

    pub fn build_backend(&self) -> Result<Backend, RagError> {
        match self.backend.kind {
            BackendKind::Runpod => Ok(Backend::Runpod(RunpodClient::new(self.runpod_config()?)?)),
            BackendKind::Ollama => Ok(Backend::Ollama(OllamaClient::new(
                &self.backend.ollama.url,
                self.backend.ollama.model.clone(),
            )?)),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
