//! Domain registry
//!
//! Built once, then shared read-only. Registration order is preserved and is
//! the router's tie-break order.

use std::collections::HashMap;

use thiserror::Error;

use super::descriptor::{DomainConfig, DomainDescriptor};
use crate::backend::{EmbeddingError, EmbeddingProvider};

/// Errors raised while building a registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// Domain id is blank
    #[error("domain id must not be empty")]
    EmptyId,

    /// Two domains share an id
    #[error("duplicate domain id: {0}")]
    DuplicateDomain(String),

    /// Description vector is empty or not finite
    #[error("domain {0} has an empty or non-finite description vector")]
    InvalidVector(String),

    /// Vector dimensions differ between domains
    #[error("domain {domain_id} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Offending domain
        domain_id: String,
        /// Dimension of the first registered domain
        expected: usize,
        /// Dimension found
        actual: usize,
    },

    /// Prompt template unusable
    #[error("domain {domain_id} has an invalid prompt template: {reason}")]
    InvalidTemplate {
        /// Offending domain
        domain_id: String,
        /// What is wrong
        reason: String,
    },

    /// Generation parameter out of range
    #[error("domain {domain_id} has an invalid parameter: {reason}")]
    InvalidParameter {
        /// Offending domain
        domain_id: String,
        /// What is wrong
        reason: String,
    },

    /// Description could not be embedded
    #[error("failed to embed description of domain {domain_id}: {source}")]
    Embedding {
        /// Offending domain
        domain_id: String,
        /// Provider error
        source: EmbeddingError,
    },
}

/// Immutable, ordered set of domains
#[derive(Clone, Debug, Default)]
pub struct DomainRegistry {
    domains: Vec<DomainDescriptor>,
    index: HashMap<String, usize>,
    dimension: usize,
}

impl DomainRegistry {
    /// Start building a registry
    #[must_use]
    pub fn builder() -> DomainRegistryBuilder {
        DomainRegistryBuilder::default()
    }

    /// Build from configuration, embedding descriptions that lack a vector
    ///
    /// # Errors
    ///
    /// Fails on the first embedding error or validation problem.
    pub async fn from_configs(
        configs: Vec<DomainConfig>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        for mut config in configs {
            let vector = match config.description_vector.take() {
                Some(vector) => vector,
                None => embedder
                    .embed(&config.description)
                    .await
                    .map_err(|source| RegistryError::Embedding {
                        domain_id: config.id.clone(),
                        source,
                    })?,
            };
            builder = builder.register(config.into_descriptor(vector));
        }
        builder.build()
    }

    /// Look up a domain
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&DomainDescriptor> {
        self.index.get(id).map(|&i| &self.domains[i])
    }

    /// Registration position of a domain
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Domains in registration order
    pub fn iter(&self) -> impl Iterator<Item = &DomainDescriptor> {
        self.domains.iter()
    }

    /// Number of domains
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Whether no domains are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Shared embedding dimension (0 when empty)
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Collects descriptors and validates them together
#[derive(Debug, Default)]
pub struct DomainRegistryBuilder {
    domains: Vec<DomainDescriptor>,
}

impl DomainRegistryBuilder {
    /// Append a domain; order is significant
    #[must_use]
    pub fn register(mut self, domain: DomainDescriptor) -> Self {
        self.domains.push(domain);
        self
    }

    /// Validate and freeze
    ///
    /// # Errors
    ///
    /// Returns the first problem found, in registration order.
    pub fn build(self) -> Result<DomainRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.domains.len());
        let mut dimension = 0;

        for (position, domain) in self.domains.iter().enumerate() {
            validate(domain)?;

            let actual = domain.description_vector.len();
            if position == 0 {
                dimension = actual;
            } else if actual != dimension {
                return Err(RegistryError::DimensionMismatch {
                    domain_id: domain.id.clone(),
                    expected: dimension,
                    actual,
                });
            }

            if index.insert(domain.id.clone(), position).is_some() {
                return Err(RegistryError::DuplicateDomain(domain.id.clone()));
            }
        }

        tracing::info!(
            domains = self.domains.len(),
            dimension,
            "Domain registry built"
        );

        Ok(DomainRegistry {
            domains: self.domains,
            index,
            dimension,
        })
    }
}

fn validate(domain: &DomainDescriptor) -> Result<(), RegistryError> {
    if domain.id.trim().is_empty() {
        return Err(RegistryError::EmptyId);
    }
    let vector = &domain.description_vector;
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return Err(RegistryError::InvalidVector(domain.id.clone()));
    }
    domain
        .prompt_template
        .validate()
        .map_err(|reason| RegistryError::InvalidTemplate {
            domain_id: domain.id.clone(),
            reason,
        })?;

    let invalid = |reason: &str| RegistryError::InvalidParameter {
        domain_id: domain.id.clone(),
        reason: reason.to_string(),
    };
    if domain.backend_id.trim().is_empty() {
        return Err(invalid("backend_id is empty"));
    }
    if domain.max_tokens == 0 {
        return Err(invalid("max_tokens must be positive"));
    }
    if domain.timeout_ms == 0 {
        return Err(invalid("timeout_ms must be positive"));
    }
    if !(0.0..=2.0).contains(&domain.temperature) {
        return Err(invalid("temperature must be within [0, 2]"));
    }
    if !(0.0..=1.0).contains(&domain.top_p) {
        return Err(invalid("top_p must be within [0, 1]"));
    }
    Ok(())
}
