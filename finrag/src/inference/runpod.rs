//! Remote backend speaking the RunPod serverless API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendFailure, InferenceBackend};
use super::config::{DEFAULT_HEALTH_TIMEOUT, GenerationOptions};

/// Sends prompts to `POST {base_url}/{endpoint_id}/runsync` with bearer auth.
///
/// `runsync` holds the connection until the job finishes, so one HTTP
/// request is one attempt and the client timeout bounds it.
#[derive(Clone)]
pub struct RunPodBackend {
    client: reqwest::Client,
    base_url: String,
    endpoint_id: String,
    api_key: Option<String>,
    model: String,
    health_timeout: Duration,
}

impl std::fmt::Debug for RunPodBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPodBackend")
            .field("base_url", &self.base_url)
            .field("endpoint_id", &self.endpoint_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl RunPodBackend {
    /// Create a backend using an already configured HTTP client.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        endpoint_id: &str,
        api_key: Option<String>,
        model: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            endpoint_id: endpoint_id.to_string(),
            api_key,
            model: model.to_string(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Bound health checks by `timeout` instead of the client's request timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.base_url, self.endpoint_id)
    }

    fn api_key(&self) -> Result<&str, BackendFailure> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendFailure::Auth("RunPod API key is not configured".to_string()))
    }
}

// ── RunPod API request/response types ──────────────────────────────

#[derive(Serialize)]
struct RunRequest<'a> {
    input: RunInput<'a>,
}

#[derive(Serialize)]
struct RunInput<'a> {
    prompt: &'a str,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Option<RunOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RunOutput {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl InferenceBackend for RunPodBackend {
    fn name(&self) -> &str {
        "runpod"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendFailure> {
        let api_key = self.api_key()?;
        let url = self.endpoint_url("runsync");
        debug!(backend = "runpod", %url, prompt_len = prompt.len(), "sending runsync request");

        let body = RunRequest {
            input: RunInput {
                prompt,
                model: &self.model,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendFailure::from_status(status, &text));
        }

        let parsed: RunResponse =
            response.json().await.map_err(|e| BackendFailure::from_reqwest(&e))?;

        match parsed.status.as_deref() {
            Some("TIMED_OUT") => {
                return Err(BackendFailure::Timeout("job timed out on the endpoint".to_string()));
            }
            Some(job @ ("FAILED" | "CANCELLED")) => {
                let detail = parsed.error.unwrap_or_default();
                return Err(BackendFailure::Transport(format!("job {job}: {detail}")));
            }
            Some(job @ ("IN_QUEUE" | "IN_PROGRESS")) => {
                return Err(BackendFailure::Transport(format!("job still {job} after runsync")));
            }
            _ => {}
        }

        let text = parsed.output.map(|o| o.text).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendFailure::Transport("response has no output text".to_string()));
        }
        Ok(text)
    }

    async fn health_check(&self) -> bool {
        let Ok(api_key) = self.api_key() else {
            return false;
        };
        let request = self
            .client
            .get(self.endpoint_url("health"))
            .bearer_auth(api_key)
            .timeout(self.health_timeout);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(backend = "runpod", error = %e, "health check failed");
                false
            }
        }
    }
}
