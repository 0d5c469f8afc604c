//! Execution Pipeline
//!
//! Runs one request through its states:
//!
//! ```text
//! Routing ──► Escalated                                   (terminal, no retrieval, no generation)
//!    │
//!    ▼
//! Retrieving ──► Generating ──► Validating ──► Succeeded
//!                    ▲   │            │
//!                    │   ▼            ▼
//!                    └─ Retrying ◄────┘ ──► Failed
//! ```
//!
//! Each attempt acquires its own lease and drops it before any backoff, so a
//! timed-out or failed attempt never leaves the backend pinned. Load, timeout
//! and backend errors draw on the domain's `max_retries`; validation failures
//! have their own budget. Resource exhaustion ends the request at once.

use std::sync::Arc;
use std::time::Instant;

use super::result::{
    estimate_tokens, AttemptRecord, Escalated, ExecutionResult, Failed, FailureCause,
    RequestState, Succeeded,
};
use super::validation::{RelevanceCheck, ResponseValidator};
use crate::backend::{GenerationError, GenerationOutput, GenerationParams};
use crate::config::{PipelineConfig, RetrievalConfig};
use crate::domain::DomainDescriptor;
use crate::lifecycle::{LifecycleError, ModelLifecycleManager};
use crate::retrieval::RetrievalStore;
use crate::routing::{IntentRouter, RoutingDecision};

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Per-request orchestration of router, retrieval, lifecycle and generation
///
/// Holds no per-request state; one pipeline serves concurrent requests.
pub struct ExecutionPipeline {
    router: Arc<IntentRouter>,
    retrieval: Arc<RetrievalStore>,
    lifecycle: Arc<ModelLifecycleManager>,
    validator: ResponseValidator,
    config: PipelineConfig,
    top_k: usize,
}

impl ExecutionPipeline {
    /// Wire a pipeline
    pub fn new(
        router: Arc<IntentRouter>,
        retrieval: Arc<RetrievalStore>,
        lifecycle: Arc<ModelLifecycleManager>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            router,
            retrieval,
            lifecycle,
            validator: ResponseValidator::new(config.max_response_chars),
            config,
            top_k: RetrievalConfig::default().top_k,
        }
    }

    /// Passages requested per tier
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Add a relevance check to validation
    #[must_use]
    pub fn with_relevance_check(mut self, check: Arc<dyn RelevanceCheck>) -> Self {
        self.validator = self.validator.with_relevance_check(check);
        self
    }

    /// Router in use
    #[must_use]
    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Lifecycle manager in use
    #[must_use]
    pub fn lifecycle(&self) -> &ModelLifecycleManager {
        &self.lifecycle
    }

    /// Retrieval store in use
    #[must_use]
    pub fn retrieval(&self) -> &RetrievalStore {
        &self.retrieval
    }

    /// Run `query` to a terminal result
    pub async fn run(&self, query: &str) -> ExecutionResult {
        let started = Instant::now();
        let mut trail = vec![RequestState::Routing];

        let routing = self.router.classify(query).await;
        let Some(domain_id) = routing.domain_id.clone() else {
            trail.push(RequestState::Escalated);
            tracing::info!(confidence = routing.confidence, "Request escalated");
            return ExecutionResult::Escalated(Escalated {
                confidence: routing.confidence,
                latency_ms: elapsed_ms(started),
                routing,
                trail,
            });
        };

        let Some(domain) = self.router.registry().get(&domain_id) else {
            trail.push(RequestState::Failed);
            return ExecutionResult::Failed(Failed {
                backend_id: String::new(),
                cause: FailureCause::Misconfigured,
                diagnostic: format!("router chose unregistered domain {domain_id}"),
                domain_id,
                last_response: None,
                latency_ms: elapsed_ms(started),
                confidence: routing.confidence,
                retries: 0,
                routing,
                trail,
                attempts: Vec::new(),
            });
        };

        trail.push(RequestState::Retrieving);
        let context = self.retrieval.retrieve(query, &domain.id, self.top_k).await;
        let prompt = domain.prompt_template.render(query, &context.render());

        self.generate_with_retries(query, domain, &prompt, routing, trail, started)
            .await
    }

    async fn generate_with_retries(
        &self,
        query: &str,
        domain: &DomainDescriptor,
        prompt: &str,
        routing: RoutingDecision,
        mut trail: Vec<RequestState>,
        started: Instant,
    ) -> ExecutionResult {
        let params = domain.generation_params();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut transient_retries = 0u32;
        let mut validation_retries = 0u32;
        let mut last_response: Option<String> = None;

        loop {
            let attempt = u32::try_from(attempts.len())
                .unwrap_or(u32::MAX)
                .saturating_add(1);
            let attempt_started = Instant::now();
            trail.push(RequestState::Generating);

            let (cause, detail) = match self.attempt(domain, prompt, &params).await {
                Ok(output) => {
                    trail.push(RequestState::Validating);
                    match self.validator.validate(query, &output.text, domain).await {
                        Ok(()) => {
                            attempts.push(AttemptRecord {
                                attempt,
                                cause: None,
                                detail: None,
                                latency_ms: elapsed_ms(attempt_started),
                            });
                            trail.push(RequestState::Succeeded);

                            let (tokens_generated, tokens_estimated) = match output.token_count {
                                Some(count) => (count, false),
                                None => (estimate_tokens(&output.text), true),
                            };
                            let latency_ms = elapsed_ms(started);
                            tracing::info!(
                                domain = %domain.id,
                                backend = %domain.backend_id,
                                attempt,
                                latency_ms,
                                "Request succeeded"
                            );

                            return ExecutionResult::Succeeded(Succeeded {
                                domain_id: domain.id.clone(),
                                backend_id: domain.backend_id.clone(),
                                response_text: output.text,
                                latency_ms,
                                tokens_generated,
                                tokens_estimated,
                                confidence: routing.confidence,
                                retries: attempt - 1,
                                routing,
                                trail,
                                attempts,
                            });
                        }
                        Err(issue) => {
                            last_response = Some(output.text);
                            (FailureCause::ValidationFailure, issue.to_string())
                        }
                    }
                }
                Err(failure) => failure,
            };

            attempts.push(AttemptRecord {
                attempt,
                cause: Some(cause),
                detail: Some(detail.clone()),
                latency_ms: elapsed_ms(attempt_started),
            });

            let retry = if cause == FailureCause::ValidationFailure {
                validation_retries < self.config.validation_retries
            } else {
                cause.is_transient() && transient_retries < domain.max_retries
            };

            if !retry {
                trail.push(RequestState::Failed);
                tracing::warn!(
                    domain = %domain.id,
                    backend = %domain.backend_id,
                    %cause,
                    attempts = attempt,
                    diagnostic = %detail,
                    "Request failed"
                );
                return ExecutionResult::Failed(Failed {
                    domain_id: domain.id.clone(),
                    backend_id: domain.backend_id.clone(),
                    cause,
                    diagnostic: detail,
                    last_response,
                    latency_ms: elapsed_ms(started),
                    confidence: routing.confidence,
                    retries: attempt - 1,
                    routing,
                    trail,
                    attempts,
                });
            }

            if cause == FailureCause::ValidationFailure {
                validation_retries += 1;
            } else {
                transient_retries += 1;
            }
            trail.push(RequestState::Retrying);

            let backoff = self.config.backoff.backoff_for_attempt(attempt - 1);
            tracing::debug!(
                domain = %domain.id,
                attempt,
                %cause,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                "Retrying after backoff"
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// One acquire-generate-release cycle
    async fn attempt(
        &self,
        domain: &DomainDescriptor,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, (FailureCause, String)> {
        let lease = self
            .lifecycle
            .acquire(&domain.backend_id)
            .await
            .map_err(|e| {
                let cause = match e {
                    LifecycleError::ResourceExhausted { .. } => FailureCause::ResourceExhausted,
                    LifecycleError::LoadFailure { .. } => FailureCause::LoadFailure,
                    LifecycleError::UnknownBackend(_) => FailureCause::Misconfigured,
                };
                (cause, e.to_string())
            })?;

        let outcome =
            tokio::time::timeout(params.timeout, lease.backend().generate(prompt, params)).await;
        drop(lease);

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e @ GenerationError::Timeout(_))) => {
                Err((FailureCause::GenerationTimeout, e.to_string()))
            }
            Ok(Err(e)) => Err((FailureCause::GenerationFailure, e.to_string())),
            Err(_) => Err((
                FailureCause::GenerationTimeout,
                GenerationError::Timeout(params.timeout).to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for ExecutionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPipeline")
            .field("router", &self.router)
            .field("lifecycle", &self.lifecycle)
            .field("validator", &self.validator)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}
