//! Client for a RunPod serverless endpoint.
//!
//! The endpoint exposes `/runsync` (blocking run), `/run` (submit a job) and
//! `/status/{id}` (poll a job). Every request carries a bearer token.

use crate::traits::TextGenerator;
use crate::{GenerationParams, InferenceError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "runpod";

#[derive(Debug, Clone)]
pub struct RunpodConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl RunpodConfig {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            request_timeout: Duration::from_secs(65),
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    Unknown(String),
}

impl JobStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "IN_QUEUE" => JobStatus::InQueue,
            "IN_PROGRESS" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            "CANCELLED" => JobStatus::Cancelled,
            "TIMED_OUT" => JobStatus::TimedOut,
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::InQueue | JobStatus::InProgress)
    }
}

#[derive(Debug, Clone)]
pub struct JobState {
    pub id: String,
    pub status: JobStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl JobState {
    /// The handler reports its own failures inside `output.error`.
    pub fn response_text(&self) -> Result<String, InferenceError> {
        let output = self
            .output
            .as_ref()
            .ok_or(InferenceError::MissingField("output"))?;

        if let Some(error) = output.get("error") {
            return Err(InferenceError::JobFailed {
                job_id: self.id.clone(),
                reason: value_to_message(error),
            });
        }

        match output {
            Value::String(text) => Ok(text.clone()),
            _ => output
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(InferenceError::MissingField("output.response")),
        }
    }

    fn failure(&self) -> InferenceError {
        InferenceError::JobFailed {
            job_id: self.id.clone(),
            reason: self
                .error
                .clone()
                .unwrap_or_else(|| format!("status {:?}", self.status)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl From<RawJob> for JobState {
    fn from(raw: RawJob) -> Self {
        JobState {
            id: raw.id.unwrap_or_default(),
            status: JobStatus::parse(raw.status.as_deref().unwrap_or("UNKNOWN")),
            output: raw.output,
            error: raw.error.as_ref().map(value_to_message),
        }
    }
}

fn value_to_message(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct JobInput<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct JobRequest<'a> {
    input: JobInput<'a>,
}

pub struct RunpodClient {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
    request_timeout: Duration,
    poll_interval: Duration,
    max_wait: Duration,
}

impl RunpodClient {
    pub fn new(config: RunpodConfig) -> Result<Self, InferenceError> {
        let endpoint = config.endpoint.trim().trim_end_matches('/').to_string();
        Url::parse(&endpoint)?;

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            endpoint,
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
            client,
            request_timeout: config.request_timeout,
            poll_interval: config.poll_interval,
            max_wait: config.max_wait,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<JobState, InferenceError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| self.classify(error))?;
        let response = check_status(response).await?;
        let raw: RawJob = response.json().await.map_err(|error| self.classify(error))?;
        Ok(raw.into())
    }

    fn classify(&self, error: reqwest::Error) -> InferenceError {
        if error.is_timeout() {
            InferenceError::Timeout(self.request_timeout.as_secs())
        } else {
            InferenceError::Http(error)
        }
    }

    fn job_request<'a>(prompt: &'a str, params: &GenerationParams) -> JobRequest<'a> {
        JobRequest {
            input: JobInput {
                prompt,
                max_tokens: params.max_tokens,
                temperature: params.temperature,
            },
        }
    }

    /// Runs a prompt through `/runsync`. A job that is still queued when the
    /// synchronous call returns is polled to completion.
    pub async fn run_sync(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        if prompt.trim().is_empty() {
            return Err(InferenceError::EmptyPrompt);
        }

        let request = self
            .client
            .post(format!("{}/runsync", self.endpoint))
            .json(&Self::job_request(prompt, params));
        let job = self.send(request).await?;
        debug!(job_id = %job.id, status = ?job.status, "runsync returned");

        match job.status {
            JobStatus::Completed => job.response_text(),
            ref status if status.is_pending() && !job.id.is_empty() => {
                info!(job_id = %job.id, "runsync still pending, polling status");
                self.wait_for(&job.id).await
            }
            _ => Err(job.failure()),
        }
    }

    /// Submits a job through `/run` and returns its id.
    pub async fn submit(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        if prompt.trim().is_empty() {
            return Err(InferenceError::EmptyPrompt);
        }

        let request = self
            .client
            .post(format!("{}/run", self.endpoint))
            .json(&Self::job_request(prompt, params));
        let job = self.send(request).await?;

        if job.id.is_empty() {
            return Err(InferenceError::MissingField("id"));
        }
        info!(job_id = %job.id, "job started");
        Ok(job.id)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobState, InferenceError> {
        let request = self
            .client
            .get(format!("{}/status/{}", self.endpoint, job_id));
        let mut job = self.send(request).await?;
        if job.id.is_empty() {
            job.id = job_id.to_string();
        }
        Ok(job)
    }

    /// Polls `/status/{id}` until the job completes, fails, or `max_wait`
    /// elapses.
    pub async fn wait_for(&self, job_id: &str) -> Result<String, InferenceError> {
        let started = Instant::now();

        loop {
            let job = self.status(job_id).await?;
            info!(job_id, status = ?job.status, "job status");

            match job.status {
                JobStatus::Completed => return job.response_text(),
                ref status if status.is_pending() => {}
                _ => return Err(job.failure()),
            }

            if started.elapsed() >= self.max_wait {
                return Err(InferenceError::Timeout(self.max_wait.as_secs()));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

async fn check_status(response: Response) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let details = response.text().await.unwrap_or_default();
    Err(InferenceError::BackendResponse {
        backend: BACKEND.to_string(),
        status: status.as_u16(),
        details,
    })
}

#[async_trait]
impl TextGenerator for RunpodClient {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        self.run_sync(prompt, params).await
    }
}
