//! Configuration
//!
//! One immutable [`CoreConfig`] is built at startup and handed to each
//! component. It can be loaded from `~/.config/mdsa/conductor.toml`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [router]
//! primary_threshold = 0.80
//! tie_break = "registration_order"
//!
//! [lifecycle]
//! memory_budget_bytes = 8589934592
//! max_loaded_backends = 2
//!
//! [lifecycle.quantization]
//! accelerator = ["full", "int8", "int4"]
//! cpu = ["int8", "int4"]
//!
//! [[lifecycle.backends]]
//! backend_id = "finance"
//! model = "phi3:mini"
//! full_precision_bytes = 7600000000
//!
//! [[domains]]
//! id = "finance"
//! display_name = "Finance"
//! description = "Banking, payments, account balances and transfers"
//! keywords = ["money", "transfer", "payment", "balance"]
//! prompt_template = "You are a finance assistant.\n{context}\n\nQuestion: {query}"
//! backend_id = "finance"
//!
//! [reasoning]
//! enabled = true
//! complexity_threshold = 0.3
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendSpec;
use crate::domain::DomainConfig;
use crate::lifecycle::QuantizationPolicy;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where configuration values came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// How keyword-fallback ties between domains are resolved
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Earliest registered domain wins
    #[default]
    RegistrationOrder,
    /// Higher classifier score wins, then registration order
    ClassifierScore,
}

/// Intent router settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum classifier similarity for a direct route
    pub primary_threshold: f32,
    /// Keyword-fallback tie policy
    pub tie_break: TieBreak,
    /// Whether keyword fallback runs below the threshold
    pub keyword_fallback: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            primary_threshold: 0.80,
            tie_break: TieBreak::RegistrationOrder,
            keyword_fallback: true,
        }
    }
}

/// Model lifecycle settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound on bytes reserved by loaded backends
    pub memory_budget_bytes: u64,
    /// Maximum resident backends (0 = unlimited)
    pub max_loaded_backends: usize,
    /// Quantization preference per compute class
    pub quantization: QuantizationPolicy,
    /// Loadable backends
    pub backends: Vec<BackendSpec>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 8 * 1024 * 1024 * 1024,
            max_loaded_backends: 0,
            quantization: QuantizationPolicy::default(),
            backends: Vec::new(),
        }
    }
}

/// Retrieval settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Passages returned per tier
    pub top_k: usize,
    /// Capacity of each domain-local index
    pub max_local_passages: usize,
    /// Capacity of the shared global index
    pub max_global_passages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_local_passages: 1_000,
            max_global_passages: 10_000,
        }
    }
}

/// Delay between pipeline retries
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial backoff delay
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f32,
    /// Add jitter to backoff
    pub use_jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl BackoffConfig {
    /// No delay between attempts
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Calculate backoff duration for retry N (0-indexed)
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(30) as i32;
        let base =
            self.initial_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            // Up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }
}

/// Execution pipeline settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Responses longer than this (in chars) fail validation
    pub max_response_chars: usize,
    /// Extra attempts after a validation failure
    pub validation_retries: u32,
    /// Delay between retries
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_response_chars: 8_000,
            validation_retries: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Orchestrator settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Requests processed at once
    pub max_concurrent_requests: usize,
    /// Capacity of the monitoring event channel
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            event_buffer: 1_024,
        }
    }
}

/// Complexity gate and multi-step planning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Whether complex queries may be split into planned sub-tasks
    pub enabled: bool,
    /// Complexity score at or above which a query is planned
    pub complexity_threshold: f32,
    /// Phrases that order one step after another; the planner splits on them
    pub sequential_indicators: Vec<String>,
    /// Phrases that make a step depend on a condition
    pub conditional_indicators: Vec<String>,
    /// Upper bound on sub-tasks in one plan
    pub max_tasks: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            complexity_threshold: 0.3,
            sequential_indicators: ["and then", "then", "after that", "afterwards", "followed by", "finally"]
                .map(String::from)
                .to_vec(),
            conditional_indicators: ["if", "unless", "otherwise", "in case"]
                .map(String::from)
                .to_vec(),
            max_tasks: 5,
        }
    }
}

// =============================================================================
// Core Configuration
// =============================================================================

/// Complete configuration of the routing core
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Intent router
    pub router: RouterConfig,
    /// Model lifecycle
    pub lifecycle: LifecycleConfig,
    /// Retrieval tiers
    pub retrieval: RetrievalConfig,
    /// Execution pipeline
    pub pipeline: PipelineConfig,
    /// Orchestrator
    pub orchestrator: OrchestratorConfig,
    /// Complexity gate and planning
    pub reasoning: ReasoningConfig,
    /// Registered domains, in registration order
    pub domains: Vec<DomainConfig>,

    #[serde(skip)]
    source: ConfigSource,
    #[serde(skip)]
    config_file_path: Option<PathBuf>,
}

impl CoreConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] for malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Where the values came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// File the configuration was read from, if any
    #[must_use]
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Check values that would make the core misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.router.primary_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ValidationError(format!(
                "router.primary_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.lifecycle.memory_budget_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "lifecycle.memory_budget_bytes must be positive".to_string(),
            ));
        }
        let quantization = &self.lifecycle.quantization;
        if quantization.accelerator.is_empty() || quantization.cpu.is_empty() {
            return Err(ConfigError::ValidationError(
                "lifecycle.quantization orders must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.lifecycle.backends {
            if !seen.insert(spec.backend_id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate backend id: {}",
                    spec.backend_id
                )));
            }
            if spec.full_precision_bytes == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "backend {} has zero full_precision_bytes",
                    spec.backend_id
                )));
            }
        }

        // Backends may also be registered in code, so only cross-check declared ones
        if !seen.is_empty() {
            if let Some(domain) = self
                .domains
                .iter()
                .find(|d| !seen.contains(d.backend_id.as_str()))
            {
                return Err(ConfigError::ValidationError(format!(
                    "domain {} references unknown backend {}",
                    domain.id, domain.backend_id
                )));
            }
        }

        let max_concurrent = self.orchestrator.max_concurrent_requests;
        if max_concurrent == 0 || max_concurrent > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::ValidationError(format!(
                "orchestrator.max_concurrent_requests must be within [1, {}], got {max_concurrent}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        let complexity = self.reasoning.complexity_threshold;
        if !complexity.is_finite() || !(0.0..=1.0).contains(&complexity) {
            return Err(ConfigError::ValidationError(format!(
                "reasoning.complexity_threshold must be within [0, 1], got {complexity}"
            )));
        }
        if self.reasoning.max_tasks == 0 {
            return Err(ConfigError::ValidationError(
                "reasoning.max_tasks must be positive".to_string(),
            ));
        }
        if self.pipeline.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "pipeline.backoff.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/mdsa/conductor.toml` or
/// `~/.config/mdsa/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mdsa").join("conductor.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<CoreConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<CoreConfig, ConfigError> {
    let mut config = CoreConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            config = CoreConfig::from_toml(&toml_content)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                domains = config.domains.len(),
                backends = config.lifecycle.backends.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Apply `MDSA_*` overrides read through `lookup`
fn apply_env_overrides(config: &mut CoreConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(threshold) = lookup("MDSA_PRIMARY_THRESHOLD").and_then(|v| v.parse::<f32>().ok())
    {
        config.router.primary_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(bytes) = lookup("MDSA_MEMORY_BUDGET_BYTES").and_then(|v| v.parse::<u64>().ok()) {
        config.lifecycle.memory_budget_bytes = bytes;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = lookup("MDSA_MAX_LOADED_BACKENDS").and_then(|v| v.parse::<usize>().ok()) {
        config.lifecycle.max_loaded_backends = max;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = lookup("MDSA_MAX_CONCURRENT").and_then(|v| v.parse::<usize>().ok()) {
        config.orchestrator.max_concurrent_requests = max;
        config.source = ConfigSource::Env;
    }
    if let Some(k) = lookup("MDSA_RETRIEVAL_TOP_K").and_then(|v| v.parse::<usize>().ok()) {
        config.retrieval.top_k = k;
        config.source = ConfigSource::Env;
    }
    if let Some(threshold) =
        lookup("MDSA_COMPLEXITY_THRESHOLD").and_then(|v| v.parse::<f32>().ok())
    {
        config.reasoning.complexity_threshold = threshold;
        config.source = ConfigSource::Env;
    }
}
