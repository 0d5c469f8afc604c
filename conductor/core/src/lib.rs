//! MDSA Conductor - Multi-Domain Query Orchestration
//!
//! Routes each incoming query to the domain specialist best suited to answer
//! it, keeps specialist backends resident within a memory budget, augments
//! prompts with retrieved context and validates what comes back.
//!
//! # Architecture
//!
//! ```text
//!                       query
//!                         │
//! ┌───────────────────────┼──────────────────────────────────────────┐
//! │                  ORCHESTRATOR                                     │
//! │   correlation id, concurrency limit, metrics, monitoring events   │
//! │  ┌────────────────────┴───────────────────────────────────────┐  │
//! │  │                 ExecutionPipeline                           │  │
//! │  │                                                             │  │
//! │  │  ┌──────────────┐   ┌───────────────┐   ┌────────────────┐  │  │
//! │  │  │ IntentRouter │──►│RetrievalStore │──►│ Lifecycle Mgr  │  │  │
//! │  │  │ classifier + │   │ local + global│   │ LRU, budget,   │  │  │
//! │  │  │ keywords     │   │ tiers         │   │ single-flight  │  │  │
//! │  │  └──────┬───────┘   └───────────────┘   └───────┬────────┘  │  │
//! │  │         │ escalate                              │ lease     │  │
//! │  │         ▼                                       ▼           │  │
//! │  │     Escalated                       generate ─► validate    │  │
//! │  │                                        ▲           │        │  │
//! │  │                                        └── retry ◄─┘        │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!                         │
//!          Succeeded | Failed | Escalated
//! ```
//!
//! # Key Types
//!
//! - [`Orchestrator`]: the single entry point, `process(query)`, plus
//!   `process_hybrid(query)` which plans complex queries into sub-tasks
//! - [`IntentRouter`]: classifier with keyword fallback and escalation
//! - [`ModelLifecycleManager`]: loads, shares and evicts backends
//! - [`RetrievalStore`]: two-tier passage retrieval
//! - [`ExecutionPipeline`]: retry, validation and escalation
//! - [`ExecutionResult`]: tagged terminal result
//! - [`HybridResult`]: direct result or a [`PlanResult`] of sub-tasks
//!
//! # Module Overview
//!
//! - [`backend`]: generation, loader and embedding traits; Ollama implementations
//! - [`config`]: TOML + environment configuration
//! - [`domain`]: domain descriptors and the registry
//! - [`events`]: monitoring events and sinks
//! - [`lifecycle`]: backend lifecycle and quantization
//! - [`metrics`]: counters, histograms, orchestrator statistics
//! - [`orchestrator`]: top-level wiring
//! - [`pipeline`]: per-request state machine
//! - [`probe`]: available-memory and compute-class probes
//! - [`reasoning`]: complexity gate, task planning and plan results
//! - [`retrieval`]: passage indexes and the two-tier store
//! - [`routing`]: intent classification

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod domain;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod probe;
pub mod reasoning;
pub mod retrieval;
pub mod routing;

// Re-exports for convenience
pub use backend::{
    BackendLoader, BackendSpec, EmbeddingProvider, GenerationBackend, GenerationError,
    GenerationOutput, GenerationParams,
};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    CoreConfig, ReasoningConfig,
};
pub use domain::{DomainConfig, DomainDescriptor, DomainRegistry, RegistryError};
pub use events::{ChannelSink, MonitoringEvent, MonitoringSink, NoopSink, TracingSink};
pub use lifecycle::{
    BackendHandle, BackendLease, HandleState, LifecycleError, ModelLifecycleManager,
    QuantizationLevel,
};
pub use metrics::OrchestratorStats;
pub use orchestrator::{BuildError, Orchestrator, OrchestratorBuilder};
pub use pipeline::{
    ExecutionPipeline, ExecutionResult, ExecutionStatus, FailureCause, PromptTemplate,
};
pub use probe::{ComputeClass, ResourceProbe, StaticProbe, SystemProbe};
pub use reasoning::{
    ClausePlanner, ComplexityAnalyzer, ComplexityAssessment, HybridResult, PlanResult,
    PlannedTask, TaskOutcome, TaskPlanner,
};
pub use retrieval::{ContextBundle, Passage, PassageIndex, RetrievalStore};
pub use routing::{IntentRouter, RoutingDecision, RoutingMethod};
