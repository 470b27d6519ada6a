//! Language-model inference against a co-located or remote backend.
//!
//! - [`OllamaBackend`] talks to an Ollama server on the local machine.
//! - [`RunPodBackend`] talks to a RunPod serverless endpoint with a bearer token.
//!
//! Both implement [`InferenceBackend`]; [`InferenceClient`] wraps whichever
//! one [`DeploymentConfig`] selects and applies the retry policy.

mod backend;
mod client;
mod config;
mod ollama;
mod runpod;

pub use backend::{BackendFailure, InferenceBackend, build_backend};
pub use client::InferenceClient;
pub use config::{
    DEFAULT_HEALTH_TIMEOUT, DEFAULT_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RUNPOD_URL,
    DeploymentConfig, DeploymentTarget, GenerationOptions, RetryPolicy,
};
pub use ollama::OllamaBackend;
pub use runpod::RunPodBackend;
