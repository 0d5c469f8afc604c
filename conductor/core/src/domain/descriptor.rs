//! Domain descriptors

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationParams;
use crate::pipeline::PromptTemplate;

/// A registered specialization: topic, prompt, backend and sampling settings
///
/// Immutable once handed to the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainDescriptor {
    /// Unique domain id
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Lowercased keywords; multi-word entries match as phrases
    pub keywords: BTreeSet<String>,
    /// Embedding of the domain description
    pub description_vector: Vec<f32>,
    /// Prompt template with `{query}` and optional `{context}`
    pub prompt_template: PromptTemplate,
    /// Backend serving this domain
    pub backend_id: String,
    /// Maximum tokens per response
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
    /// Per-attempt generation bound
    pub timeout_ms: u64,
    /// Retries after load, timeout or backend errors
    pub max_retries: u32,
}

impl DomainDescriptor {
    /// Descriptor with default generation settings
    pub fn new(
        id: impl Into<String>,
        backend_id: impl Into<String>,
        description_vector: Vec<f32>,
        prompt_template: impl Into<PromptTemplate>,
    ) -> Self {
        let id = id.into();
        let defaults = GenerationDefaults::default();
        Self {
            display_name: id.clone(),
            id,
            keywords: BTreeSet::new(),
            description_vector,
            prompt_template: prompt_template.into(),
            backend_id: backend_id.into(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            top_k: defaults.top_k,
            timeout_ms: defaults.timeout_ms,
            max_retries: defaults.max_retries,
        }
    }

    /// Set display name
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Add keywords (normalized to trimmed lowercase; blanks dropped)
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords.extend(
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty()),
        );
        self
    }

    /// Set per-attempt timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set sampling parameters
    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, top_p: f32, top_k: u32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self.top_k = top_k;
        self
    }

    /// Parameters for one generation call
    #[must_use]
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

struct GenerationDefaults {
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    timeout_ms: u64,
    max_retries: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

fn default_max_tokens() -> u32 {
    GenerationDefaults::default().max_tokens
}

fn default_temperature() -> f32 {
    GenerationDefaults::default().temperature
}

fn default_top_p() -> f32 {
    GenerationDefaults::default().top_p
}

fn default_top_k() -> u32 {
    GenerationDefaults::default().top_k
}

fn default_timeout_ms() -> u64 {
    GenerationDefaults::default().timeout_ms
}

fn default_max_retries() -> u32 {
    GenerationDefaults::default().max_retries
}

/// Domain as written in configuration: description text instead of a vector
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Unique domain id
    pub id: String,
    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub display_name: Option<String>,
    /// Text embedded to produce the description vector
    pub description: String,
    /// Precomputed vector; skips embedding when present
    #[serde(default)]
    pub description_vector: Option<Vec<f32>>,
    /// Keywords for fallback routing
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Prompt template
    pub prompt_template: String,
    /// Backend serving this domain
    pub backend_id: String,
    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Top-k sampling cutoff
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Per-attempt generation bound
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after load, timeout or backend errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl DomainConfig {
    /// Config entry with default generation settings
    pub fn new(
        id: impl Into<String>,
        backend_id: impl Into<String>,
        description: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            description: description.into(),
            description_vector: None,
            keywords: Vec::new(),
            prompt_template: prompt_template.into(),
            backend_id: backend_id.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }

    /// Set fallback keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Build a descriptor using `description_vector`
    #[must_use]
    pub fn into_descriptor(self, description_vector: Vec<f32>) -> DomainDescriptor {
        let display_name = self.display_name.unwrap_or_else(|| self.id.clone());
        DomainDescriptor::new(
            self.id,
            self.backend_id,
            description_vector,
            PromptTemplate::new(self.prompt_template),
        )
        .with_display_name(display_name)
        .with_keywords(self.keywords)
        .with_max_tokens(self.max_tokens)
        .with_sampling(self.temperature, self.top_p, self.top_k)
        .with_timeout_ms(self.timeout_ms)
        .with_max_retries(self.max_retries)
    }
}
