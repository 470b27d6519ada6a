//! The backend seam and failure classification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::config::{DeploymentConfig, DeploymentTarget, GenerationOptions};
use super::ollama::OllamaBackend;
use super::runpod::RunPodBackend;
use crate::error::{RagError, Result};

/// Why a single attempt failed. Decides whether the client retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFailure {
    /// The request did not complete in time. Retried.
    Timeout(String),
    /// Credentials were missing or rejected. Never retried.
    Auth(String),
    /// Anything else: connection errors, server errors, malformed or empty
    /// responses. Retried.
    Transport(String),
}

impl BackendFailure {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body.trim(), 200))
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout(message),
            _ => Self::Transport(message),
        }
    }

    /// Classify a client-side error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Transport(format!("malformed response: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m) | Self::Auth(m) | Self::Transport(m) => m,
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(m) => write!(f, "timeout: {m}"),
            Self::Auth(m) => write!(f, "authentication failed: {m}"),
            Self::Transport(m) => write!(f, "transport failure: {m}"),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One way of turning a prompt into a completion.
///
/// A backend makes exactly one attempt per call; retries belong to
/// [`InferenceClient`](super::InferenceClient).
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name for logs and errors.
    fn name(&self) -> &str;

    /// Make one completion attempt.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<String, BackendFailure>;

    /// Whether the backend currently answers. Never errors.
    async fn health_check(&self) -> bool;
}

/// Construct the backend selected by `config.target`.
pub fn build_backend(config: &DeploymentConfig) -> Result<Arc<dyn InferenceBackend>> {
    config.validate()?;
    let client = http_client(config.request_timeout)?;
    let backend: Arc<dyn InferenceBackend> = match &config.target {
        DeploymentTarget::CoLocated { base_url } => {
            Arc::new(
                OllamaBackend::new(client, base_url, &config.model)
                    .with_health_timeout(config.health_timeout),
            )
        }
        DeploymentTarget::Remote { base_url, endpoint_id, api_key } => Arc::new(
            RunPodBackend::new(client, base_url, endpoint_id, api_key.clone(), &config.model)
                .with_health_timeout(config.health_timeout),
        ),
    };
    Ok(backend)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            BackendFailure::from_status(StatusCode::UNAUTHORIZED, ""),
            BackendFailure::Auth(_)
        ));
        assert!(matches!(
            BackendFailure::from_status(StatusCode::FORBIDDEN, "no"),
            BackendFailure::Auth(_)
        ));
        assert!(matches!(
            BackendFailure::from_status(StatusCode::GATEWAY_TIMEOUT, ""),
            BackendFailure::Timeout(_)
        ));
        assert!(matches!(
            BackendFailure::from_status(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            BackendFailure::Transport(_)
        ));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let failure = BackendFailure::from_status(StatusCode::BAD_GATEWAY, &"é".repeat(500));
        assert!(failure.message().chars().count() < 250);
    }
}
