//! Orchestrator - The Single Entry Point
//!
//! Wires registry, router, retrieval, lifecycle and pipeline together and
//! exposes [`Orchestrator::process`]. Every request gets a correlation ID,
//! runs under a global concurrency limit, is recorded in metrics and is
//! reported to the monitoring sink exactly once.
//!
//! [`Orchestrator::process_hybrid`] puts a complexity gate in front of
//! routing: complex queries are planned into sub-tasks that run in
//! dependency order, independent tasks concurrently. A plan holds one
//! concurrency permit and counts as one request.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdsa_conductor::{config::load_config, backend::*, events::TracingSink, probe::SystemProbe};
//! use mdsa_conductor::Orchestrator;
//!
//! let endpoint = OllamaEndpoint::from_env();
//! let (orchestrator, indexes) = Orchestrator::bootstrap(
//!     load_config()?,
//!     Arc::new(OllamaEmbedder::new(endpoint.clone(), "nomic-embed-text")),
//!     Arc::new(OllamaLoader::new(endpoint)),
//!     Arc::new(SystemProbe::detect()),
//!     Arc::new(TracingSink),
//! )
//! .await?;
//!
//! indexes.global.insert("Our support line is open 9-5", "faq");
//! let result = orchestrator.process("When can I call support?").await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{BackendLoader, EmbeddingProvider};
use crate::config::{ConfigError, CoreConfig};
use crate::domain::DomainRegistry;
use crate::events::{MonitoringEvent, MonitoringSink, NoopSink};
use crate::lifecycle::ModelLifecycleManager;
use crate::metrics::{OrchestratorMetrics, OrchestratorStats};
use crate::pipeline::{ExecutionPipeline, ExecutionResult, RelevanceCheck};
use crate::probe::{ResourceProbe, SystemProbe};
use crate::reasoning::{
    ClausePlanner, ComplexityAnalyzer, ComplexityAssessment, ExecutionPlan, HybridResult,
    PlanError, PlanResult, PlannedTask, TaskOutcome, TaskPlanner,
};
use crate::retrieval::{InMemoryIndexes, RetrievalStore};
use crate::routing::IntentRouter;

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Errors assembling an orchestrator
#[derive(Debug, Error)]
pub enum BuildError {
    /// No domain registry supplied
    #[error("domain registry is required")]
    MissingRegistry,

    /// No embedding provider supplied
    #[error("embedding provider is required")]
    MissingEmbedder,

    /// No backend loader supplied
    #[error("backend loader is required")]
    MissingLoader,

    /// Configuration failed validation
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// A domain points at a backend the lifecycle manager does not know
    #[error("domain {domain_id} uses undeclared backend {backend_id}")]
    UndeclaredBackend {
        /// Domain
        domain_id: String,
        /// Backend it names
        backend_id: String,
    },
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: CoreConfig,
    registry: Option<Arc<DomainRegistry>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    loader: Option<Arc<dyn BackendLoader>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    retrieval: Option<RetrievalStore>,
    sink: Option<Arc<dyn MonitoringSink>>,
    relevance: Option<Arc<dyn RelevanceCheck>>,
    planner: Option<Arc<dyn TaskPlanner>>,
}

impl OrchestratorBuilder {
    /// Use `config` (defaults otherwise)
    #[must_use]
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Domains to route between
    #[must_use]
    pub fn registry(mut self, registry: impl Into<Arc<DomainRegistry>>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Provider embedding queries for the router
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Loader used by the lifecycle manager
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn BackendLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Memory probe; defaults to [`SystemProbe::detect`]
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Retrieval store; defaults to empty in-memory tiers whose handles are
    /// available from [`Orchestrator::indexes`]
    #[must_use]
    pub fn retrieval(mut self, retrieval: RetrievalStore) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Monitoring sink; defaults to [`NoopSink`]
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn MonitoringSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Relevance check added to response validation
    #[must_use]
    pub fn relevance_check(mut self, check: Arc<dyn RelevanceCheck>) -> Self {
        self.relevance = Some(check);
        self
    }

    /// Planner for complex queries; defaults to [`ClausePlanner`]
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn TaskPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Assemble the orchestrator
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when a required collaborator is missing, the
    /// configuration is invalid, or a domain names an undeclared backend.
    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;

        let registry = self.registry.ok_or(BuildError::MissingRegistry)?;
        let embedder = self.embedder.ok_or(BuildError::MissingEmbedder)?;
        let loader = self.loader.ok_or(BuildError::MissingLoader)?;
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::detect()) as Arc<dyn ResourceProbe>);
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(NoopSink) as Arc<dyn MonitoringSink>);

        let lifecycle = Arc::new(ModelLifecycleManager::new(
            self.config.lifecycle.clone(),
            loader,
            probe,
        ));
        if let Some(domain) = registry.iter().find(|d| !lifecycle.knows(&d.backend_id)) {
            return Err(BuildError::UndeclaredBackend {
                domain_id: domain.id.clone(),
                backend_id: domain.backend_id.clone(),
            });
        }

        let (retrieval, indexes) = match self.retrieval {
            Some(retrieval) => (retrieval, None),
            None => {
                let domain_ids = registry.iter().map(|d| d.id.as_str());
                let (retrieval, indexes) =
                    RetrievalStore::in_memory(&self.config.retrieval, domain_ids);
                (retrieval, Some(indexes))
            }
        };
        let planner = self.planner.unwrap_or_else(|| {
            Arc::new(ClausePlanner::new(&self.config.reasoning)) as Arc<dyn TaskPlanner>
        });

        let router = Arc::new(IntentRouter::new(
            Arc::clone(&registry),
            embedder,
            self.config.router.clone(),
        ));
        let mut pipeline = ExecutionPipeline::new(
            router,
            Arc::new(retrieval),
            lifecycle,
            self.config.pipeline.clone(),
        )
        .with_top_k(self.config.retrieval.top_k);
        if let Some(check) = self.relevance {
            pipeline = pipeline.with_relevance_check(check);
        }

        let max_concurrent = self.config.orchestrator.max_concurrent_requests;
        tracing::info!(
            domains = registry.len(),
            backends = self.config.lifecycle.backends.len(),
            budget_bytes = self.config.lifecycle.memory_budget_bytes,
            max_concurrent,
            reasoning = self.config.reasoning.enabled,
            source = %self.config.source(),
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            pipeline: Arc::new(pipeline),
            sink,
            metrics: Arc::new(OrchestratorMetrics::new()),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            indexes,
            analyzer: ComplexityAnalyzer::new(&self.config.reasoning),
            planner,
            reasoning_enabled: self.config.reasoning.enabled,
            max_tasks: self.config.reasoning.max_tasks,
        })
    }
}

/// Multi-domain query orchestrator
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Orchestrator {
    pipeline: Arc<ExecutionPipeline>,
    sink: Arc<dyn MonitoringSink>,
    metrics: Arc<OrchestratorMetrics>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    indexes: Option<InMemoryIndexes>,
    analyzer: ComplexityAnalyzer,
    planner: Arc<dyn TaskPlanner>,
    reasoning_enabled: bool,
    max_tasks: usize,
}

impl Orchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Build everything from configuration
    ///
    /// Domain descriptions are embedded with `embedder`, each domain gets an
    /// empty local index, and the lifecycle manager is seeded with the
    /// configured backend specs. The returned index handles are for ingestion.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid, a description cannot be
    /// embedded, or the domains are inconsistent.
    pub async fn bootstrap(
        config: CoreConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        loader: Arc<dyn BackendLoader>,
        probe: Arc<dyn ResourceProbe>,
        sink: Arc<dyn MonitoringSink>,
    ) -> anyhow::Result<(Self, InMemoryIndexes)> {
        config.validate().context("invalid configuration")?;

        let registry = DomainRegistry::from_configs(config.domains.clone(), embedder.as_ref())
            .await
            .context("failed to build domain registry")?;
        let (retrieval, indexes) =
            RetrievalStore::in_memory(&config.retrieval, registry.iter().map(|d| d.id.as_str()));

        let orchestrator = Self::builder()
            .config(config)
            .registry(registry)
            .embedder(embedder)
            .loader(loader)
            .probe(probe)
            .retrieval(retrieval)
            .sink(sink)
            .build()
            .context("failed to assemble orchestrator")?;

        Ok((orchestrator, indexes))
    }

    /// Process one query to a terminal result
    pub async fn process(&self, query: &str) -> ExecutionResult {
        self.process_with_id(Uuid::new_v4(), query).await
    }

    /// Process one query under a caller-supplied correlation ID
    pub async fn process_with_id(&self, correlation_id: Uuid, query: &str) -> ExecutionResult {
        let span = tracing::info_span!("request", %correlation_id);
        async {
            // The semaphore is never closed
            let _permit = self.permits.acquire().await.ok();
            let _in_flight = self.metrics.begin();

            let result = self.pipeline.run(query).await;

            self.metrics.record_result(&result);
            self.sink
                .emit(MonitoringEvent::from_result(correlation_id, query, &result));
            result
        }
        .instrument(span)
        .await
    }

    /// Process queries concurrently, results in input order
    ///
    /// Concurrency is still bounded by `max_concurrent_requests`.
    pub async fn process_batch<I, S>(&self, queries: I) -> Vec<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let queries: Vec<S> = queries.into_iter().collect();
        futures::future::join_all(queries.iter().map(|q| self.process(q.as_ref()))).await
    }

    /// Route `query` whole, or plan it into sub-tasks when it is complex
    ///
    /// Falls back to [`Orchestrator::process`] when reasoning is disabled,
    /// the query scores below `reasoning.complexity_threshold`, or the
    /// planner finds a single task.
    pub async fn process_hybrid(&self, query: &str) -> HybridResult {
        if !self.reasoning_enabled {
            return HybridResult::Direct(self.process(query).await);
        }

        let assessment = self.assess(query);
        if !assessment.is_complex {
            return HybridResult::Direct(self.process(query).await);
        }

        let planned = self.planner.plan(query, &assessment).await;
        if matches!(&planned, Ok(tasks) if tasks.len() < 2) {
            tracing::debug!(score = assessment.score, "Complex query planned as one task, routing whole");
            return HybridResult::Direct(self.process(query).await);
        }

        HybridResult::Planned(self.run_plan(Uuid::new_v4(), query, assessment, planned).await)
    }

    /// Plan `query` into sub-tasks whatever its complexity score
    pub async fn process_plan(&self, query: &str) -> PlanResult {
        let assessment = self.assess(query);
        let planned = self.planner.plan(query, &assessment).await;
        self.run_plan(Uuid::new_v4(), query, assessment, planned).await
    }

    /// Complexity of `query` against the registered domains
    #[must_use]
    pub fn assess(&self, query: &str) -> ComplexityAssessment {
        self.analyzer.analyze(query, self.pipeline.router().registry())
    }

    async fn run_plan(
        &self,
        correlation_id: Uuid,
        query: &str,
        assessment: ComplexityAssessment,
        planned: Result<Vec<PlannedTask>, PlanError>,
    ) -> PlanResult {
        let span = tracing::info_span!("plan", %correlation_id);
        async {
            // The semaphore is never closed
            let _permit = self.permits.acquire().await.ok();
            let _in_flight = self.metrics.begin();
            let started = Instant::now();

            let result = match planned.and_then(|tasks| ExecutionPlan::new(tasks, self.max_tasks)) {
                Ok(plan) => {
                    let tasks = self.execute_plan(&plan).await;
                    PlanResult::completed(assessment, tasks, elapsed_ms(started))
                }
                Err(error) => {
                    tracing::warn!(%error, "Query could not be planned");
                    PlanResult::rejected(assessment, error.to_string(), elapsed_ms(started))
                }
            };

            tracing::info!(
                status = %result.status,
                tasks = result.tasks.len(),
                skipped = result.skipped(),
                latency_ms = result.latency_ms,
                "Plan completed"
            );
            self.metrics.record_plan(&result);
            self.sink
                .emit(MonitoringEvent::from_plan(correlation_id, query, &result));
            result
        }
        .instrument(span)
        .await
    }

    /// Run `plan` wave by wave; a task whose dependency did not succeed is
    /// skipped
    async fn execute_plan(&self, plan: &ExecutionPlan) -> Vec<TaskOutcome> {
        let mut outcomes: HashMap<usize, TaskOutcome> = HashMap::with_capacity(plan.len());

        for wave in plan.waves() {
            let mut runnable = Vec::with_capacity(wave.len());
            for task in wave {
                let blocked_by = task
                    .dependencies
                    .iter()
                    .copied()
                    .find(|d| !outcomes.get(d).is_some_and(TaskOutcome::succeeded));
                match blocked_by {
                    Some(blocked_by) => {
                        tracing::info!(task_id = task.task_id, blocked_by, "Task skipped");
                        outcomes.insert(
                            task.task_id,
                            TaskOutcome::Skipped {
                                task: task.clone(),
                                blocked_by,
                            },
                        );
                    }
                    None => runnable.push(task),
                }
            }

            let results = futures::future::join_all(runnable.iter().map(|task| {
                self.pipeline
                    .run(&task.query)
                    .instrument(tracing::info_span!("task", task_id = task.task_id))
            }))
            .await;

            for (task, result) in runnable.into_iter().zip(results) {
                outcomes.insert(
                    task.task_id,
                    TaskOutcome::Ran {
                        task: task.clone(),
                        result,
                    },
                );
            }
        }

        plan.tasks()
            .iter()
            .filter_map(|t| outcomes.remove(&t.task_id))
            .collect()
    }

    /// Aggregate statistics
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        self.metrics.summary()
    }

    /// Zero the request statistics; requests in flight are still counted
    /// when they finish
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Ingestion handles of the default in-memory retrieval store
    ///
    /// `None` when a store was supplied through
    /// [`OrchestratorBuilder::retrieval`]; [`Orchestrator::bootstrap`]
    /// returns its handles directly.
    #[must_use]
    pub fn indexes(&self) -> Option<&InMemoryIndexes> {
        self.indexes.as_ref()
    }

    /// Raw metrics
    #[must_use]
    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    /// Underlying pipeline
    #[must_use]
    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    /// Lifecycle manager
    #[must_use]
    pub fn lifecycle(&self) -> &ModelLifecycleManager {
        self.pipeline.lifecycle()
    }

    /// Retrieval store
    #[must_use]
    pub fn retrieval(&self) -> &RetrievalStore {
        self.pipeline.retrieval()
    }

    /// Configured concurrency limit
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline)
            .field("max_concurrent", &self.max_concurrent)
            .field("reasoning_enabled", &self.reasoning_enabled)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backend::{
        BackendSpec, EmbeddingError, GenerationBackend, GenerationError, GenerationOutput,
        GenerationParams, LoadError,
    };
    use crate::domain::{DomainConfig, DomainDescriptor};
    use crate::events::ChannelSink;
    use crate::lifecycle::QuantizationLevel;
    use crate::config::RetrievalConfig;
    use crate::pipeline::ExecutionStatus;
    use crate::probe::{ComputeClass, StaticProbe};

    struct Echo;

    #[async_trait]
    impl GenerationBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<GenerationOutput, GenerationError> {
            Ok(GenerationOutput::text(format!("echo: {}", prompt.len())))
        }
    }

    struct EchoLoader;

    #[async_trait]
    impl BackendLoader for EchoLoader {
        async fn load(
            &self,
            _spec: &BackendSpec,
            _level: QuantizationLevel,
        ) -> Result<Arc<dyn GenerationBackend>, LoadError> {
            Ok(Arc::new(Echo))
        }
    }

    /// Bag-of-letters embedding: deterministic and description-sensitive
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("money") || text.contains("invest") { 1.0 } else { 0.0 },
                if text.contains("code") || text.contains("compile") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    fn config() -> CoreConfig {
        let mut config = CoreConfig::default();
        config.lifecycle.backends = vec![
            BackendSpec::new("fin-llm", "fin:7b", 1_000),
            BackendSpec::new("code-llm", "code:7b", 1_000),
        ];
        config.domains = vec![
            DomainConfig::new("finance", "fin-llm", "Money and invest questions", "{query}"),
            DomainConfig::new("coding", "code-llm", "Code that will not compile", "{query}"),
        ];
        config
    }

    async fn bootstrap(sink: Arc<dyn MonitoringSink>) -> (Orchestrator, InMemoryIndexes) {
        Orchestrator::bootstrap(
            config(),
            Arc::new(TopicEmbedder),
            Arc::new(EchoLoader),
            Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)),
            sink,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_and_process() {
        let (sink, mut rx) = ChannelSink::new(8);
        let (orchestrator, indexes) = bootstrap(Arc::new(sink)).await;
        assert_eq!(indexes.local.len(), 2);

        let result = orchestrator.process("how do I invest money").await;
        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.domain_id(), Some("finance"));
        assert_eq!(result.backend_id(), Some("fin-llm"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.query, "how do I invest money");
        assert_eq!(event.domain_id.as_deref(), Some("finance"));
        assert_eq!(event.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_counts() {
        let (orchestrator, _) = bootstrap(Arc::new(NoopSink)).await;

        let results = orchestrator
            .process_batch(["invest money", "my code will not compile", "weather today"])
            .await;

        let statuses: Vec<_> = results.iter().map(ExecutionResult::status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Success,
                ExecutionStatus::Success,
                ExecutionStatus::Escalated
            ]
        );
        assert_eq!(results[1].domain_id(), Some("coding"));

        let stats = orchestrator.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.escalated, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.domains.len(), 2);
    }

    #[test]
    fn test_build_rejects_undeclared_backend() {
        let registry = DomainRegistry::builder()
            .register(DomainDescriptor::new("legal", "law-llm", vec![1.0], "{query}"))
            .build()
            .unwrap();

        let err = Orchestrator::builder()
            .registry(registry)
            .embedder(Arc::new(TopicEmbedder))
            .loader(Arc::new(EchoLoader))
            .probe(Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)))
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::UndeclaredBackend { ref backend_id, .. } if backend_id == "law-llm"
        ));
    }

    #[test]
    fn test_build_requires_collaborators() {
        let err = Orchestrator::builder().build().unwrap_err();
        assert!(matches!(err, BuildError::MissingRegistry));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let mut config = config();
        config.router.primary_threshold = 1.5;

        let err = Orchestrator::bootstrap(
            config,
            Arc::new(TopicEmbedder),
            Arc::new(EchoLoader),
            Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)),
            Arc::new(NoopSink),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("invalid configuration"));
    }

    fn builder() -> OrchestratorBuilder {
        let registry = DomainRegistry::builder()
            .register(
                DomainDescriptor::new("finance", "fin-llm", vec![1.0, 0.0, 0.0], "{query}")
                    .with_keywords(["balance"]),
            )
            .register(
                DomainDescriptor::new("coding", "code-llm", vec![0.0, 1.0, 0.0], "{query}")
                    .with_keywords(["compiler"]),
            )
            .build()
            .unwrap();
        Orchestrator::builder()
            .config(config())
            .registry(registry)
            .embedder(Arc::new(TopicEmbedder))
            .loader(Arc::new(EchoLoader))
            .probe(Arc::new(StaticProbe::unlimited(ComputeClass::Cpu)))
    }

    #[tokio::test]
    async fn test_default_retrieval_exposes_its_indexes() {
        let orchestrator = builder().build().unwrap();

        let indexes = orchestrator.indexes().unwrap();
        indexes.local["finance"].insert("Statements post monthly", "finance/faq");
        indexes.global.insert("Offices close at five", "global/hours");

        let stats = orchestrator.retrieval().stats();
        assert_eq!(stats.local_documents["finance"], 1);
        assert_eq!(stats.global_documents, 1);

        let (store, _) = RetrievalStore::in_memory(&RetrievalConfig::default(), ["finance"]);
        let supplied = builder().retrieval(store).build().unwrap();
        assert!(supplied.indexes().is_none());
    }

    /// Planner that always returns a cyclic plan
    struct CyclicPlanner;

    #[async_trait]
    impl TaskPlanner for CyclicPlanner {
        async fn plan(
            &self,
            _query: &str,
            _assessment: &ComplexityAssessment,
        ) -> Result<Vec<PlannedTask>, PlanError> {
            Ok(vec![
                PlannedTask::new(1, "check my balance").after(2),
                PlannedTask::new(2, "fix the compiler").after(1),
            ])
        }
    }

    #[tokio::test]
    async fn test_unusable_plan_is_an_error_result() {
        let orchestrator = builder().planner(Arc::new(CyclicPlanner)).build().unwrap();

        let result = orchestrator
            .process_hybrid("check my balance then fix the compiler")
            .await;

        let HybridResult::Planned(plan) = &result else {
            panic!("expected a planned result, got {result:?}");
        };
        assert_eq!(plan.status, ExecutionStatus::Error);
        assert!(plan.tasks.is_empty());
        assert!(plan.diagnostic.as_deref().unwrap().contains("cycle"));

        let stats = orchestrator.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reasoning_requests, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_disabled_reasoning_routes_whole() {
        let mut config = config();
        config.reasoning.enabled = false;
        let orchestrator = builder().config(config).build().unwrap();

        let result = orchestrator
            .process_hybrid("check my balance then fix the compiler")
            .await;

        assert!(!result.is_planned());
        assert_eq!(orchestrator.stats().reasoning_requests, 0);
        assert!(orchestrator.assess("check my balance then fix the compiler").is_complex);
    }
}
