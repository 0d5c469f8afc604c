//! Backend Traits
//!
//! Trait definitions for the collaborators the core drives but does not
//! implement: generation backends, the loader that brings them into memory,
//! and the embedding provider used by the intent router.
//!
//! # Design Philosophy
//!
//! A [`BackendLoader`] turns a [`BackendSpec`] plus a quantization level into a
//! live [`GenerationBackend`]. The lifecycle manager owns the loaded instances;
//! the pipeline only ever sees them through a lease.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::QuantizationLevel;

// ============================================================================
// Generation
// ============================================================================

/// Sampling parameters for one generation call
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationParams {
    /// Maximum tokens in the response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// Upper bound on one generation call
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GenerationParams {
    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set nucleus cutoff
    #[must_use]
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set top-k cutoff
    #[must_use]
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Text produced by a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Response text
    pub text: String,
    /// Exact token count when the backend reports one
    pub token_count: Option<u32>,
}

impl GenerationOutput {
    /// Output without a reported token count
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_count: None,
        }
    }
}

/// Errors reported by a generation call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// Call exceeded its time bound
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend returned an error
    #[error("backend error: {0}")]
    Backend(String),

    /// Backend could not be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A loaded inference backend
///
/// Implementations must tolerate their future being dropped mid-call: the
/// pipeline enforces timeouts by cancelling the call.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs (e.g., "ollama:llama3.2:3b")
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerationError>;
}

// ============================================================================
// Loading
// ============================================================================

/// Static description of a loadable backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Identifier domains refer to
    pub backend_id: String,
    /// Model name handed to the loader
    pub model: String,
    /// Resident size at full precision
    pub full_precision_bytes: u64,
    /// Levels this backend can be loaded at (empty means all)
    #[serde(default)]
    pub quantizations: Vec<QuantizationLevel>,
    /// Per-level model names, e.g. a pre-quantized `-q4_0` tag
    #[serde(default)]
    pub variants: BTreeMap<QuantizationLevel, String>,
}

impl BackendSpec {
    /// Create a spec supporting every quantization level
    pub fn new(
        backend_id: impl Into<String>,
        model: impl Into<String>,
        full_precision_bytes: u64,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            model: model.into(),
            full_precision_bytes,
            quantizations: Vec::new(),
            variants: BTreeMap::new(),
        }
    }

    /// Restrict supported levels
    #[must_use]
    pub fn with_quantizations(mut self, levels: Vec<QuantizationLevel>) -> Self {
        self.quantizations = levels;
        self
    }

    /// Use a different model name at `level`
    #[must_use]
    pub fn with_variant(mut self, level: QuantizationLevel, model: impl Into<String>) -> Self {
        self.variants.insert(level, model.into());
        self
    }

    /// Whether the backend can be loaded at `level`
    #[must_use]
    pub fn supports(&self, level: QuantizationLevel) -> bool {
        self.quantizations.is_empty() || self.quantizations.contains(&level)
    }

    /// Model name to load at `level`
    #[must_use]
    pub fn model_for(&self, level: QuantizationLevel) -> &str {
        self.variants.get(&level).unwrap_or(&self.model)
    }
}

/// Errors raised while loading or unloading a backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// Loader could not reach the serving runtime
    #[error("backend runtime unreachable: {0}")]
    Unreachable(String),

    /// Runtime refused or failed the load
    #[error("load rejected: {0}")]
    Rejected(String),
}

/// Brings backends into and out of memory
#[async_trait]
pub trait BackendLoader: Send + Sync {
    /// Load `spec` at `level` and return a ready backend
    async fn load(
        &self,
        spec: &BackendSpec,
        level: QuantizationLevel,
    ) -> Result<Arc<dyn GenerationBackend>, LoadError>;

    /// Release resources held for `spec`
    async fn unload(&self, _spec: &BackendSpec, _level: QuantizationLevel) -> Result<(), LoadError> {
        Ok(())
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Errors from the embedding provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    /// Provider could not be reached
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// Provider returned something unusable
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Maps text to a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}
