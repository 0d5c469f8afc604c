//! Request Execution
//!
//! Routing, retrieval, generation and validation for one query, with retry
//! and escalation. See [`ExecutionPipeline`] for the state machine.

mod executor;
mod prompt;
mod result;
mod validation;

pub use executor::ExecutionPipeline;
pub use prompt::{PromptTemplate, CONTEXT_PLACEHOLDER, QUERY_PLACEHOLDER};
pub use result::{
    estimate_tokens, AttemptRecord, Escalated, ExecutionResult, ExecutionStatus, Failed,
    FailureCause, RequestState, Succeeded,
};
pub use validation::{RelevanceCheck, ResponseValidator, ValidationIssue};
