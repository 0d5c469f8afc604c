//! Response validation

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::DomainDescriptor;

/// Why a response was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Blank output
    #[error("response is empty")]
    Empty,

    /// Output longer than the ceiling
    #[error("response has {chars} characters, limit is {limit}")]
    TooLong {
        /// Characters in the response
        chars: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Relevance check rejected the output
    #[error("response judged irrelevant: {0}")]
    Irrelevant(String),
}

/// Pluggable relevance judgement
#[async_trait]
pub trait RelevanceCheck: Send + Sync {
    /// `Err(reason)` when `response` does not answer `query` for `domain`
    async fn check(
        &self,
        query: &str,
        response: &str,
        domain: &DomainDescriptor,
    ) -> Result<(), String>;
}

/// Empty, length and relevance checks
#[derive(Clone)]
pub struct ResponseValidator {
    max_chars: usize,
    relevance: Option<Arc<dyn RelevanceCheck>>,
}

impl ResponseValidator {
    /// Validator with a length ceiling and no relevance check
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            relevance: None,
        }
    }

    /// Add a relevance check
    #[must_use]
    pub fn with_relevance_check(mut self, check: Arc<dyn RelevanceCheck>) -> Self {
        self.relevance = Some(check);
        self
    }

    /// Check one response
    ///
    /// # Errors
    ///
    /// Returns the first rule the response breaks.
    pub async fn validate(
        &self,
        query: &str,
        response: &str,
        domain: &DomainDescriptor,
    ) -> Result<(), ValidationIssue> {
        if response.trim().is_empty() {
            return Err(ValidationIssue::Empty);
        }

        let chars = response.chars().count();
        if chars > self.max_chars {
            return Err(ValidationIssue::TooLong {
                chars,
                limit: self.max_chars,
            });
        }

        if let Some(check) = &self.relevance {
            check
                .check(query, response, domain)
                .await
                .map_err(ValidationIssue::Irrelevant)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResponseValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseValidator")
            .field("max_chars", &self.max_chars)
            .field("relevance", &self.relevance.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MustMention(&'static str);

    #[async_trait]
    impl RelevanceCheck for MustMention {
        async fn check(
            &self,
            _query: &str,
            response: &str,
            _domain: &DomainDescriptor,
        ) -> Result<(), String> {
            if response.contains(self.0) {
                Ok(())
            } else {
                Err(format!("missing {}", self.0))
            }
        }
    }

    fn domain() -> DomainDescriptor {
        DomainDescriptor::new("finance", "fin", vec![1.0], "{query}")
    }

    #[tokio::test]
    async fn test_rejects_empty_and_long() {
        let validator = ResponseValidator::new(5);
        assert_eq!(
            validator.validate("q", " \n ", &domain()).await,
            Err(ValidationIssue::Empty)
        );
        assert_eq!(
            validator.validate("q", "toolong", &domain()).await,
            Err(ValidationIssue::TooLong { chars: 7, limit: 5 })
        );
        assert!(validator.validate("q", "fine", &domain()).await.is_ok());
    }

    #[tokio::test]
    async fn test_relevance_check() {
        let validator =
            ResponseValidator::new(100).with_relevance_check(Arc::new(MustMention("balance")));
        assert!(validator.validate("q", "your balance is 3", &domain()).await.is_ok());
        assert!(matches!(
            validator.validate("q", "hello", &domain()).await,
            Err(ValidationIssue::Irrelevant(_))
        ));
    }
}
