//! Query complexity analysis
//!
//! A query scores higher the more of these signals it carries:
//!
//! | Signal       | Weight | Example                                  |
//! |--------------|--------|------------------------------------------|
//! | sequential   | 0.4    | "check my balance **and then** ..."      |
//! | conditional  | 0.3    | "**if** the transfer failed ..."         |
//! | multi-domain | 0.4    | keywords of two or more domains          |
//!
//! The score is capped at 1.0; a query is complex when it reaches the
//! configured threshold.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::ReasoningConfig;
use crate::domain::DomainRegistry;
use crate::routing::keywords::{keyword_hits, matched_keywords, tokenize};

const SEQUENTIAL_WEIGHT: f32 = 0.4;
const CONDITIONAL_WEIGHT: f32 = 0.3;
const MULTI_DOMAIN_WEIGHT: f32 = 0.4;

/// Outcome of [`ComplexityAnalyzer::analyze`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComplexityAssessment {
    /// Weighted score in `[0, 1]`
    pub score: f32,
    /// Whether the score reached the threshold
    pub is_complex: bool,
    /// Sequential indicators found
    pub sequential: Vec<String>,
    /// Conditional indicators found
    pub conditional: Vec<String>,
    /// Domains whose keywords appear, in registration order
    pub domains: Vec<String>,
}

impl ComplexityAssessment {
    /// Whether the query touches more than one domain by keyword
    #[must_use]
    pub fn spans_domains(&self) -> bool {
        self.domains.len() > 1
    }
}

/// Decides whether a query should be planned instead of routed whole
#[derive(Clone, Debug)]
pub struct ComplexityAnalyzer {
    threshold: f32,
    sequential: BTreeSet<String>,
    conditional: BTreeSet<String>,
}

impl ComplexityAnalyzer {
    /// Analyzer using the indicators and threshold in `config`
    #[must_use]
    pub fn new(config: &ReasoningConfig) -> Self {
        let normalize = |phrases: &[String]| {
            phrases
                .iter()
                .map(|p| tokenize(p).join(" "))
                .filter(|p| !p.is_empty())
                .collect::<BTreeSet<String>>()
        };
        Self {
            threshold: config.complexity_threshold,
            sequential: normalize(&config.sequential_indicators),
            conditional: normalize(&config.conditional_indicators),
        }
    }

    /// Score at or above which a query is complex
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score `query` against the indicators and `registry`'s keywords
    #[must_use]
    pub fn analyze(&self, query: &str, registry: &DomainRegistry) -> ComplexityAssessment {
        let tokens = tokenize(query);
        let owned = |found: Vec<&str>| found.into_iter().map(str::to_string).collect::<Vec<_>>();

        let sequential = owned(matched_keywords(&tokens, &self.sequential));
        let conditional = owned(matched_keywords(&tokens, &self.conditional));
        let domains: Vec<String> = registry
            .iter()
            .filter(|d| keyword_hits(&tokens, &d.keywords) > 0)
            .map(|d| d.id.clone())
            .collect();

        let mut score = 0.0_f32;
        if !sequential.is_empty() {
            score += SEQUENTIAL_WEIGHT;
        }
        if !conditional.is_empty() {
            score += CONDITIONAL_WEIGHT;
        }
        if domains.len() > 1 {
            score += MULTI_DOMAIN_WEIGHT;
        }
        let score = score.min(1.0);

        let assessment = ComplexityAssessment {
            score,
            is_complex: score >= self.threshold && score > 0.0,
            sequential,
            conditional,
            domains,
        };
        tracing::debug!(
            score = assessment.score,
            is_complex = assessment.is_complex,
            domains = assessment.domains.len(),
            "Complexity assessed"
        );
        assessment
    }
}
