//! Co-located backend speaking the Ollama HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{BackendFailure, InferenceBackend};
use super::config::{DEFAULT_HEALTH_TIMEOUT, GenerationOptions};

/// Sends prompts to `POST {base_url}/api/generate` without streaming.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    health_timeout: Duration,
}

impl OllamaBackend {
    /// Create a backend using an already configured HTTP client.
    pub fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Bound health checks by `timeout` instead of the client's request timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}

// ── Ollama API request/response types ──────────────────────────────

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, BackendFailure> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(backend = "ollama", %url, prompt_len = prompt.len(), "sending generate request");

        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: ModelOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendFailure::from_status(status, &text));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| BackendFailure::from_reqwest(&e))?;
        if parsed.response.trim().is_empty() {
            return Err(BackendFailure::Transport("empty completion".to_string()));
        }
        Ok(parsed.response)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(backend = "ollama", error = %e, "health check failed");
                false
            }
        }
    }
}
