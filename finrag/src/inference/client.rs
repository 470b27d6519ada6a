//! The retrying inference client.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::backend::{BackendFailure, InferenceBackend, build_backend};
use super::config::{DeploymentConfig, GenerationOptions, RetryPolicy};
use crate::error::{RagError, Result};

struct Route {
    backend: Arc<dyn InferenceBackend>,
    retry: RetryPolicy,
    generation: GenerationOptions,
}

/// Sends prompts to the configured backend with timeout and bounded retry.
///
/// Callers never see which backend is active. [`reconfigure`](Self::reconfigure)
/// swaps the backend for subsequent calls; a call already in flight finishes
/// on the backend it started with.
///
/// Failure handling per attempt:
///
/// | Failure | Action | Surfaced as |
/// |---------|--------|-------------|
/// | auth | fail immediately | [`RagError::InferenceAuthError`] |
/// | timeout | retry with backoff | [`RagError::InferenceTimeout`] |
/// | transport / malformed | retry with backoff | [`RagError::InferenceUnavailable`] |
///
/// When retries run out, the kind of the last failure decides the error.
pub struct InferenceClient {
    route: RwLock<Arc<Route>>,
}

impl InferenceClient {
    /// Build a client for the backend selected by `config`.
    pub fn new(config: DeploymentConfig) -> Result<Self> {
        let backend = build_backend(&config)?;
        info!(backend = backend.name(), model = %config.model, "inference client ready");
        Ok(Self::with_backend(backend, config.retry, config.generation))
    }

    /// Build a client around an existing backend.
    pub fn with_backend(
        backend: Arc<dyn InferenceBackend>,
        retry: RetryPolicy,
        generation: GenerationOptions,
    ) -> Self {
        Self { route: RwLock::new(Arc::new(Route { backend, retry, generation })) }
    }

    /// Switch to the backend selected by `config`.
    ///
    /// On error the current backend stays active.
    pub async fn reconfigure(&self, config: DeploymentConfig) -> Result<()> {
        let backend = build_backend(&config)?;
        self.replace_backend(backend, config.retry, config.generation).await;
        Ok(())
    }

    /// Switch to an existing backend.
    pub async fn replace_backend(
        &self,
        backend: Arc<dyn InferenceBackend>,
        retry: RetryPolicy,
        generation: GenerationOptions,
    ) {
        let name = backend.name().to_string();
        *self.route.write().await = Arc::new(Route { backend, retry, generation });
        info!(backend = %name, "inference backend switched");
    }

    async fn route(&self) -> Arc<Route> {
        Arc::clone(&*self.route.read().await)
    }

    /// Name of the active backend.
    pub async fn backend_name(&self) -> String {
        self.route().await.backend.name().to_string()
    }

    /// Sampling options from the active configuration.
    pub async fn default_options(&self) -> GenerationOptions {
        self.route().await.generation
    }

    /// Whether the active backend answers.
    pub async fn health_check(&self) -> bool {
        let route = self.route().await;
        let healthy = route.backend.health_check().await;
        info!(backend = route.backend.name(), healthy, "inference health check");
        healthy
    }

    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InferenceAuthError`] on the first auth failure
    /// - [`RagError::InferenceTimeout`] if the last allowed attempt timed out
    /// - [`RagError::InferenceUnavailable`] if the last allowed attempt failed otherwise
    pub async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let route = self.route().await;
        let backend = route.backend.name().to_string();
        let max_attempts = route.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match route.backend.generate(prompt, options).await {
                Ok(text) => {
                    info!(%backend, attempt, completion_len = text.len(), "completion received");
                    return Ok(text);
                }
                Err(BackendFailure::Auth(message)) => {
                    error!(%backend, attempt, error = %message, "inference authentication failed");
                    return Err(RagError::InferenceAuthError { backend, message });
                }
                Err(failure) => failure,
            };

            warn!(%backend, attempt, max_attempts, error = %failure, "inference attempt failed");
            if attempt >= max_attempts {
                error!(%backend, attempts = attempt, "inference retries exhausted");
                return Err(match failure {
                    BackendFailure::Timeout(_) => {
                        RagError::InferenceTimeout { backend, attempts: attempt }
                    }
                    other => RagError::InferenceUnavailable {
                        backend,
                        attempts: attempt,
                        message: other.message().to_string(),
                    },
                });
            }
            tokio::time::sleep(route.retry.backoff(attempt)).await;
        }
    }

    /// [`complete`](Self::complete) with the configured sampling options.
    pub async fn complete_default(&self, prompt: &str) -> Result<String> {
        let options = self.default_options().await;
        self.complete(prompt, &options).await
    }
}
