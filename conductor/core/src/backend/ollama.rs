//! Ollama Backend Implementation
//!
//! Generation, loading and embeddings against a local Ollama server.
//!
//! # Ollama API
//!
//! - `/api/generate` - completions; an empty prompt with `keep_alive` preloads
//!   a model, `keep_alive: 0` unloads it
//! - `/api/embeddings` - text embeddings
//!
//! Quantization is expressed through model tags (e.g. `llama3.2:3b-instruct-q4_0`),
//! so the loader picks the variant configured for the chosen level.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::traits::{
    BackendLoader, BackendSpec, EmbeddingError, EmbeddingProvider, GenerationBackend,
    GenerationError, GenerationOutput, GenerationParams, LoadError,
};
use crate::lifecycle::QuantizationLevel;

/// Default Ollama host
pub const DEFAULT_OLLAMA_HOST: &str = "localhost";
/// Default Ollama port
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Connection details shared by all Ollama collaborators
#[derive(Clone, Debug)]
pub struct OllamaEndpoint {
    host: String,
    port: u16,
    http_client: reqwest::Client,
}

impl OllamaEndpoint {
    /// Create an endpoint for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            host: host.into(),
            port,
            http_client,
        }
    }

    /// Create from `OLLAMA_HOST` / `OLLAMA_PORT`
    #[must_use]
    pub fn from_env() -> Self {
        let host =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_OLLAMA_PORT);

        Self::new(host, port)
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn embeddings_url(&self) -> String {
        format!("{}/api/embeddings", self.base_url())
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, PostError> {
        let mut request = self.http_client.post(url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(PostError::Transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PostError::Status { status, body });
        }

        response.json().await.map_err(PostError::Decode)
    }
}

/// Failure of one Ollama HTTP exchange
#[derive(Debug, Error)]
enum PostError {
    #[error("request to Ollama failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Ollama returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unreadable Ollama response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl PostError {
    fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) | Self::Decode(e) if e.is_timeout())
    }

    fn is_connect(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect())
    }

    /// Timeouts keep their own kind so the pipeline classifies them as such
    fn into_generation_error(self, timeout: Duration) -> GenerationError {
        if self.is_timeout() {
            GenerationError::Timeout(timeout)
        } else if self.is_connect() {
            GenerationError::Unavailable(self.to_string())
        } else {
            GenerationError::Backend(self.to_string())
        }
    }

    fn into_load_error(self) -> LoadError {
        if self.is_connect() || self.is_timeout() {
            LoadError::Unreachable(self.to_string())
        } else {
            LoadError::Rejected(self.to_string())
        }
    }

    fn into_embedding_error(self) -> EmbeddingError {
        match self {
            Self::Status { .. } | Self::Decode(_) => EmbeddingError::Failed(self.to_string()),
            Self::Transport(_) => EmbeddingError::Unavailable(self.to_string()),
        }
    }
}

impl Default for OllamaEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_PORT)
    }
}

/// Request body for a non-streaming completion
fn generate_body(model: &str, prompt: &str, params: &GenerationParams) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "prompt": prompt,
        "stream": false,
        "options": {
            "num_predict": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "top_k": params.top_k,
        },
    })
}

/// Request body that loads or unloads `model` without generating
fn keep_alive_body(model: &str, keep_alive: &str) -> serde_json::Value {
    // Bare numbers are seconds (0 unloads, negative pins); anything else is a duration string
    let keep_alive = match keep_alive.parse::<i64>() {
        Ok(seconds) => serde_json::json!(seconds),
        Err(_) => serde_json::json!(keep_alive),
    };
    serde_json::json!({
        "model": model,
        "prompt": "",
        "stream": false,
        "keep_alive": keep_alive,
    })
}

fn parse_generate(data: &serde_json::Value) -> GenerationOutput {
    let text = data
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();

    let token_count = data
        .get("eval_count")
        .and_then(serde_json::Value::as_u64)
        .and_then(|c| u32::try_from(c).ok());

    GenerationOutput { text, token_count }
}

#[allow(clippy::cast_possible_truncation)]
fn parse_embedding(data: &serde_json::Value) -> Option<Vec<f32>> {
    data.get("embedding")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============================================================================
// Generation
// ============================================================================

/// One model served by Ollama
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    endpoint: OllamaEndpoint,
    model: String,
    name: String,
}

impl OllamaBackend {
    /// Backend for `model` on `endpoint`
    pub fn new(endpoint: OllamaEndpoint, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            endpoint,
            name: format!("ollama:{model}"),
            model,
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerationError> {
        let body = generate_body(&self.model, prompt, params);
        let data = self
            .endpoint
            .post(&self.endpoint.generate_url(), &body, Some(params.timeout))
            .await
            .map_err(|e| e.into_generation_error(params.timeout))?;

        Ok(parse_generate(&data))
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Preloads and evicts models in the Ollama runtime
#[derive(Clone, Debug)]
pub struct OllamaLoader {
    endpoint: OllamaEndpoint,
    keep_alive: String,
}

impl OllamaLoader {
    /// Loader keeping models resident until explicitly unloaded
    #[must_use]
    pub fn new(endpoint: OllamaEndpoint) -> Self {
        Self {
            endpoint,
            keep_alive: "-1".to_string(),
        }
    }

    /// Override the keep-alive sent with preload requests
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.keep_alive = keep_alive.into();
        self
    }
}

#[async_trait]
impl BackendLoader for OllamaLoader {
    async fn load(
        &self,
        spec: &BackendSpec,
        level: QuantizationLevel,
    ) -> Result<Arc<dyn GenerationBackend>, LoadError> {
        let model = spec.model_for(level);
        let body = keep_alive_body(model, &self.keep_alive);
        self.endpoint
            .post(&self.endpoint.generate_url(), &body, None)
            .await
            .map_err(PostError::into_load_error)?;

        tracing::debug!(backend_id = %spec.backend_id, model, %level, "Ollama model preloaded");
        Ok(Arc::new(OllamaBackend::new(self.endpoint.clone(), model)))
    }

    async fn unload(&self, spec: &BackendSpec, level: QuantizationLevel) -> Result<(), LoadError> {
        let body = keep_alive_body(spec.model_for(level), "0");
        self.endpoint
            .post(&self.endpoint.generate_url(), &body, None)
            .await
            .map(|_| ())
            .map_err(PostError::into_load_error)
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Embedding provider backed by an Ollama embedding model
#[derive(Clone, Debug)]
pub struct OllamaEmbedder {
    endpoint: OllamaEndpoint,
    model: String,
}

impl OllamaEmbedder {
    /// Embedder using `model` (e.g. `nomic-embed-text`)
    pub fn new(endpoint: OllamaEndpoint, model: impl Into<String>) -> Self {
        Self {
            endpoint,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({ "model": self.model, "prompt": text });
        let data = self
            .endpoint
            .post(&self.endpoint.embeddings_url(), &body, None)
            .await
            .map_err(PostError::into_embedding_error)?;

        parse_embedding(&data)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::Failed("response carried no embedding".to_string()))
    }
}
