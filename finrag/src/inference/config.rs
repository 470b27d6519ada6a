//! Deployment configuration for the inference backend.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Default Ollama address for the co-located backend.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default RunPod serverless API base.
pub const DEFAULT_RUNPOD_URL: &str = "https://api.runpod.ai/v2";
/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3";
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Default timeout for a health check request.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Where completions are generated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// An Ollama server on the local machine.
    CoLocated {
        /// Base URL, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// A RunPod serverless endpoint.
    Remote {
        /// API base, e.g. `https://api.runpod.ai/v2`.
        base_url: String,
        /// The serverless endpoint id.
        endpoint_id: String,
        /// Bearer token. Requests fail with an auth error when absent.
        #[serde(default, skip_serializing)]
        api_key: Option<String>,
    },
}

impl DeploymentTarget {
    /// Short backend name used in logs and errors.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::CoLocated { .. } => "ollama",
            Self::Remote { .. } => "runpod",
        }
    }
}

impl fmt::Debug for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoLocated { base_url } => {
                f.debug_struct("CoLocated").field("base_url", base_url).finish()
            }
            Self::Remote { base_url, endpoint_id, api_key } => f
                .debug_struct("Remote")
                .field("base_url", base_url)
                .field("endpoint_id", endpoint_id)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Bounded retry with exponential backoff.
///
/// `max_attempts` counts every attempt, the first included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before giving up (at least 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Sampling options passed with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length limit in tokens.
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 1000 }
    }
}

/// Everything needed to construct an [`InferenceClient`](super::InferenceClient).
///
/// # Example
///
/// ```rust,ignore
/// use finrag::inference::{DeploymentConfig, InferenceClient};
///
/// let config = DeploymentConfig::remote("https://api.runpod.ai/v2", "abc123", Some(key))
///     .with_model("llama3");
/// let client = InferenceClient::new(config)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Which backend to talk to.
    pub target: DeploymentTarget,
    /// Model name sent with each request.
    pub model: String,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Timeout applied to health checks, independent of `request_timeout`.
    #[serde(default = "default_health_timeout")]
    pub health_timeout: Duration,
    /// Retry behavior on timeouts and transport failures.
    pub retry: RetryPolicy,
    /// Default sampling options.
    pub generation: GenerationOptions,
}

fn default_health_timeout() -> Duration {
    DEFAULT_HEALTH_TIMEOUT
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self::co_located(DEFAULT_OLLAMA_URL)
    }
}

impl DeploymentConfig {
    /// Target an Ollama server at `base_url`.
    pub fn co_located(base_url: impl Into<String>) -> Self {
        Self::with_target(DeploymentTarget::CoLocated { base_url: base_url.into() })
    }

    /// Target a RunPod serverless endpoint.
    pub fn remote(
        base_url: impl Into<String>,
        endpoint_id: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self::with_target(DeploymentTarget::Remote {
            base_url: base_url.into(),
            endpoint_id: endpoint_id.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn with_target(target: DeploymentTarget) -> Self {
        Self {
            target,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            retry: RetryPolicy::default(),
            generation: GenerationOptions::default(),
        }
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the health check timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default sampling options.
    pub fn with_generation(mut self, generation: GenerationOptions) -> Self {
        self.generation = generation;
        self
    }

    /// Read the configuration from process environment variables.
    ///
    /// | Variable | Meaning | Default |
    /// |----------|---------|---------|
    /// | `FINRAG_DEPLOYMENT` | `local` or `remote` | `local` |
    /// | `OLLAMA_BASE_URL` | co-located base URL | `http://localhost:11434` |
    /// | `RUNPOD_API_URL` | remote API base | `https://api.runpod.ai/v2` |
    /// | `RUNPOD_ENDPOINT_ID` | remote endpoint id | required for `remote` |
    /// | `RUNPOD_API_KEY` | remote bearer token | none |
    /// | `FINRAG_MODEL` | model name | `llama3` |
    /// | `FINRAG_TIMEOUT_SECS` | request timeout | `120` |
    /// | `FINRAG_MAX_ATTEMPTS` | total attempts | `3` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let deployment = var("FINRAG_DEPLOYMENT").unwrap_or_else(|| "local".to_string());
        let mut config = match deployment.to_ascii_lowercase().as_str() {
            "local" | "co-located" | "colocated" | "ollama" => Self::co_located(
                var("OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            ),
            "remote" | "runpod" => {
                let endpoint_id = var("RUNPOD_ENDPOINT_ID").ok_or_else(|| {
                    RagError::ConfigError(
                        "RUNPOD_ENDPOINT_ID must be set for remote deployment".to_string(),
                    )
                })?;
                Self::remote(
                    var("RUNPOD_API_URL").unwrap_or_else(|| DEFAULT_RUNPOD_URL.to_string()),
                    endpoint_id,
                    var("RUNPOD_API_KEY"),
                )
            }
            other => {
                return Err(RagError::ConfigError(format!(
                    "FINRAG_DEPLOYMENT must be 'local' or 'remote', got '{other}'"
                )));
            }
        };

        if let Some(model) = var("FINRAG_MODEL") {
            config.model = model;
        }
        if let Some(secs) = var("FINRAG_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                RagError::ConfigError(format!("FINRAG_TIMEOUT_SECS is not a number: '{secs}'"))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = var("FINRAG_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts.parse().map_err(|_| {
                RagError::ConfigError(format!("FINRAG_MAX_ATTEMPTS is not a number: '{attempts}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can produce a working client.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(RagError::ConfigError("max_attempts must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(RagError::ConfigError("request_timeout must be non-zero".to_string()));
        }
        if self.health_timeout.is_zero() {
            return Err(RagError::ConfigError("health_timeout must be non-zero".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(RagError::ConfigError("model must not be empty".to_string()));
        }
        let base_url = match &self.target {
            DeploymentTarget::CoLocated { base_url } => base_url,
            DeploymentTarget::Remote { base_url, endpoint_id, .. } => {
                if endpoint_id.trim().is_empty() {
                    return Err(RagError::ConfigError("endpoint_id must not be empty".to_string()));
                }
                base_url
            }
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(RagError::ConfigError(format!(
                "base_url must be an http(s) URL, got '{base_url}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(200), Duration::from_secs(8));
    }

    #[test]
    fn defaults_to_local_ollama() {
        let config = DeploymentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.target,
            DeploymentTarget::CoLocated { base_url: DEFAULT_OLLAMA_URL.to_string() }
        );
        assert_eq!(config.model, "llama3");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.health_timeout, DEFAULT_HEALTH_TIMEOUT);
    }

    #[test]
    fn health_timeout_is_separate_from_request_timeout() {
        let config = DeploymentConfig::co_located(DEFAULT_OLLAMA_URL)
            .with_timeout(Duration::from_secs(300))
            .with_health_timeout(Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.health_timeout, Duration::from_secs(2));
        assert!(config.clone().with_health_timeout(Duration::ZERO).validate().is_err());

        let mut stored = serde_json::to_value(&config).unwrap();
        stored.as_object_mut().unwrap().remove("health_timeout");
        let restored: DeploymentConfig = serde_json::from_value(stored).unwrap();
        assert_eq!(restored.health_timeout, DEFAULT_HEALTH_TIMEOUT);
    }

    #[test]
    fn reads_remote_settings() {
        let config = DeploymentConfig::from_lookup(lookup(&[
            ("FINRAG_DEPLOYMENT", "remote"),
            ("RUNPOD_ENDPOINT_ID", "ep-1"),
            ("RUNPOD_API_KEY", "secret"),
            ("FINRAG_TIMEOUT_SECS", "30"),
            ("FINRAG_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.target.backend_name(), "runpod");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn remote_requires_endpoint_id() {
        let err = DeploymentConfig::from_lookup(lookup(&[("FINRAG_DEPLOYMENT", "remote")]))
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(DeploymentConfig::from_lookup(lookup(&[("FINRAG_DEPLOYMENT", "cloud")])).is_err());
        assert!(DeploymentConfig::from_lookup(lookup(&[("FINRAG_MAX_ATTEMPTS", "0")])).is_err());
        assert!(DeploymentConfig::from_lookup(lookup(&[("FINRAG_TIMEOUT_SECS", "soon")])).is_err());
        assert!(DeploymentConfig::co_located("localhost:11434").validate().is_err());
    }
}
