//! Backend Integration
//!
//! Traits for generation backends, their loader, and the embedding provider,
//! plus Ollama implementations of all three.
//!
//! # Usage
//!
//! ```ignore
//! use mdsa_conductor::backend::{OllamaEndpoint, OllamaLoader, BackendSpec};
//! use mdsa_conductor::lifecycle::QuantizationLevel;
//!
//! let loader = OllamaLoader::new(OllamaEndpoint::from_env());
//! let spec = BackendSpec::new("finance", "phi3:mini", 7_600_000_000);
//! let backend = loader.load(&spec, QuantizationLevel::Int8).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::{
    OllamaBackend, OllamaEmbedder, OllamaEndpoint, OllamaLoader, DEFAULT_OLLAMA_HOST,
    DEFAULT_OLLAMA_PORT,
};
pub use traits::{
    BackendLoader, BackendSpec, EmbeddingError, EmbeddingProvider, GenerationBackend,
    GenerationError, GenerationOutput, GenerationParams, LoadError,
};
