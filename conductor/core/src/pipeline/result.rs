//! Execution results
//!
//! A tagged result: each variant carries only the fields that are valid for
//! it, so an escalation can never be read as if it had a response.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::routing::RoutingDecision;

/// Coarse outcome reported to callers and monitoring
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Validated response produced
    Success,
    /// No domain matched confidently
    Escalated,
    /// Pipeline gave up
    Error,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Escalated => write!(f, "escalated"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Why a request or attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Lifecycle manager could not free enough memory
    ResourceExhausted,
    /// Backend failed to initialize
    LoadFailure,
    /// Generation exceeded its time bound
    GenerationTimeout,
    /// Backend reported an error
    GenerationFailure,
    /// Output was rejected
    ValidationFailure,
    /// Domain or backend wiring is inconsistent
    Misconfigured,
}

impl FailureCause {
    /// Whether the pipeline retries this cause within `max_retries`
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::LoadFailure | Self::GenerationTimeout | Self::GenerationFailure
        )
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResourceExhausted => "resource_exhausted",
            Self::LoadFailure => "load_failure",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationFailure => "generation_failure",
            Self::ValidationFailure => "validation_failure",
            Self::Misconfigured => "misconfigured",
        };
        f.write_str(name)
    }
}

/// Per-request state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Classifying the query
    Routing,
    /// Terminal: no domain
    Escalated,
    /// Fetching context
    Retrieving,
    /// Acquiring a backend and generating
    Generating,
    /// Checking the response
    Validating,
    /// Waiting before another attempt
    Retrying,
    /// Terminal: success
    Succeeded,
    /// Terminal: error
    Failed,
}

/// One generation attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Failure cause, `None` when accepted
    pub cause: Option<FailureCause>,
    /// Diagnostic for failed attempts
    pub detail: Option<String>,
    /// Attempt wall time
    pub latency_ms: u64,
}

/// Successful request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Succeeded {
    /// Domain that answered
    pub domain_id: String,
    /// Backend that generated
    pub backend_id: String,
    /// Validated response
    pub response_text: String,
    /// End-to-end latency
    pub latency_ms: u64,
    /// Reported or estimated tokens
    pub tokens_generated: u32,
    /// Whether `tokens_generated` is a character-length estimate
    pub tokens_estimated: bool,
    /// Routing confidence
    pub confidence: f32,
    /// Attempts beyond the first
    pub retries: u32,
    /// Routing outcome
    pub routing: RoutingDecision,
    /// States visited
    pub trail: Vec<RequestState>,
    /// Attempt history
    pub attempts: Vec<AttemptRecord>,
}

/// Request that ended in error
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Failed {
    /// Domain that was tried
    pub domain_id: String,
    /// Backend that was tried
    pub backend_id: String,
    /// Final cause
    pub cause: FailureCause,
    /// Last diagnostic text
    pub diagnostic: String,
    /// Last response text, kept after validation failures
    pub last_response: Option<String>,
    /// End-to-end latency
    pub latency_ms: u64,
    /// Routing confidence
    pub confidence: f32,
    /// Attempts beyond the first
    pub retries: u32,
    /// Routing outcome
    pub routing: RoutingDecision,
    /// States visited
    pub trail: Vec<RequestState>,
    /// Attempt history
    pub attempts: Vec<AttemptRecord>,
}

/// Request with no confident domain
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Escalated {
    /// Best classifier score seen
    pub confidence: f32,
    /// End-to-end latency
    pub latency_ms: u64,
    /// Routing outcome
    pub routing: RoutingDecision,
    /// States visited
    pub trail: Vec<RequestState>,
}

/// Terminal artifact of one request
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Validated response
    #[serde(rename = "success")]
    Succeeded(Succeeded),
    /// Gave up
    #[serde(rename = "error")]
    Failed(Failed),
    /// Routed nowhere
    Escalated(Escalated),
}

impl ExecutionResult {
    /// Coarse status
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Succeeded(_) => ExecutionStatus::Success,
            Self::Failed(_) => ExecutionStatus::Error,
            Self::Escalated(_) => ExecutionStatus::Escalated,
        }
    }

    /// Domain involved, if any
    #[must_use]
    pub fn domain_id(&self) -> Option<&str> {
        match self {
            Self::Succeeded(s) => Some(&s.domain_id),
            Self::Failed(f) => Some(&f.domain_id),
            Self::Escalated(_) => None,
        }
    }

    /// Backend involved, if any
    #[must_use]
    pub fn backend_id(&self) -> Option<&str> {
        match self {
            Self::Succeeded(s) => Some(&s.backend_id),
            Self::Failed(f) => Some(&f.backend_id),
            Self::Escalated(_) => None,
        }
    }

    /// Response text on success
    #[must_use]
    pub fn response_text(&self) -> Option<&str> {
        match self {
            Self::Succeeded(s) => Some(&s.response_text),
            _ => None,
        }
    }

    /// End-to-end latency
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        match self {
            Self::Succeeded(s) => s.latency_ms,
            Self::Failed(f) => f.latency_ms,
            Self::Escalated(e) => e.latency_ms,
        }
    }

    /// Routing confidence
    #[must_use]
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Succeeded(s) => s.confidence,
            Self::Failed(f) => f.confidence,
            Self::Escalated(e) => e.confidence,
        }
    }

    /// Attempts beyond the first
    #[must_use]
    pub fn retries(&self) -> u32 {
        match self {
            Self::Succeeded(s) => s.retries,
            Self::Failed(f) => f.retries,
            Self::Escalated(_) => 0,
        }
    }

    /// Tokens generated on success
    #[must_use]
    pub fn tokens_generated(&self) -> u32 {
        match self {
            Self::Succeeded(s) => s.tokens_generated,
            _ => 0,
        }
    }

    /// Routing outcome
    #[must_use]
    pub fn routing(&self) -> &RoutingDecision {
        match self {
            Self::Succeeded(s) => &s.routing,
            Self::Failed(f) => &f.routing,
            Self::Escalated(e) => &e.routing,
        }
    }

    /// States visited
    #[must_use]
    pub fn trail(&self) -> &[RequestState] {
        match self {
            Self::Succeeded(s) => &s.trail,
            Self::Failed(f) => &f.trail,
            Self::Escalated(e) => &e.trail,
        }
    }
}

/// Token estimate for backends that report none: one token per four chars
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}
