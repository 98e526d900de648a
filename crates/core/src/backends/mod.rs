pub mod ollama;
pub mod runpod;

pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use runpod::{JobState, JobStatus, RunpodClient, RunpodConfig};

use crate::traits::TextGenerator;
use crate::{GenerationParams, InferenceError};
use async_trait::async_trait;

/// The hosted model the session talks to.
pub enum Backend {
    Runpod(RunpodClient),
    Ollama(OllamaClient),
}

#[async_trait]
impl TextGenerator for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Runpod(client) => client.name(),
            Backend::Ollama(client) => client.name(),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        match self {
            Backend::Runpod(client) => client.generate(prompt, params).await,
            Backend::Ollama(client) => client.generate(prompt, params).await,
        }
    }
}
