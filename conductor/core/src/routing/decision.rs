//! Routing decisions

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How a decision was reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingMethod {
    /// Classifier similarity cleared the threshold
    #[serde(rename = "classifier")]
    Classifier,
    /// Keyword matches chose the domain
    #[serde(rename = "keyword-fallback")]
    KeywordFallback,
    /// No domain matched confidently
    #[serde(rename = "escalated")]
    Escalated,
}

impl fmt::Display for RoutingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classifier => write!(f, "classifier"),
            Self::KeywordFallback => write!(f, "keyword-fallback"),
            Self::Escalated => write!(f, "escalated"),
        }
    }
}

/// Outcome of classifying one query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Chosen domain, `None` when escalated
    pub domain_id: Option<String>,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Decision method
    pub method: RoutingMethod,
    /// Classifier score per domain
    pub scores: BTreeMap<String, f32>,
    /// Keyword hits for the chosen domain
    pub keyword_hits: usize,
}

impl RoutingDecision {
    /// Escalation with the best classifier score as confidence
    #[must_use]
    pub fn escalated(confidence: f32, scores: BTreeMap<String, f32>) -> Self {
        Self {
            domain_id: None,
            confidence: confidence.clamp(0.0, 1.0),
            method: RoutingMethod::Escalated,
            scores,
            keyword_hits: 0,
        }
    }

    /// Whether the query was escalated
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        self.method == RoutingMethod::Escalated
    }
}
