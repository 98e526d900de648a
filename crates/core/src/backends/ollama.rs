use crate::traits::TextGenerator;
use crate::{GenerationParams, InferenceError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

const BACKEND: &str = "ollama";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api";

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    context: &'a [i64],
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    context: Vec<i64>,
}

pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, InferenceError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        Ok(Self {
            base_url,
            model: model.into(),
            client: Client::new(),
        })
    }

    /// Generates a completion and returns it with the continuation context the
    /// server hands back for follow-up prompts.
    pub async fn generate_with_context(
        &self,
        prompt: &str,
        context: &[i64],
        params: &GenerationParams,
    ) -> Result<(String, Vec<i64>), InferenceError> {
        if prompt.trim().is_empty() {
            return Err(InferenceError::EmptyPrompt);
        }

        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            context,
            options: GenerateOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                num_predict: params.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::BackendResponse {
                backend: BACKEND.to_string(),
                status: status.as_u16(),
                details: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok((parsed.response, parsed.context))
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        let (response, _context) = self.generate_with_context(prompt, &[], params).await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn generate_sends_sampling_options_and_returns_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "mistral",
                "stream": false,
                "context": [1, 2],
                "options": { "top_k": 5 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "Paris",
                "context": [1, 2, 3]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ollama = OllamaClient::new(&format!("{}/api", server.uri()), "mistral")
            .expect("mock uri is valid");
        let params = GenerationParams {
            top_k: Some(5),
            top_p: Some(0.9),
            ..GenerationParams::default()
        };

        let (answer, context) = ollama
            .generate_with_context("Capital of France?", &[1, 2], &params)
            .await
            .expect("generation should succeed");
        assert_eq!(answer, "Paris");
        assert_eq!(context, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let ollama = OllamaClient::new(&format!("{}/api", server.uri()), "missing")
            .expect("mock uri is valid");
        let result = ollama.generate("hi", &GenerationParams::default()).await;

        assert!(matches!(
            result,
            Err(InferenceError::BackendResponse { status: 404, .. })
        ));
    }
}
