//! Hybrid Reasoning
//!
//! Queries that chain steps, attach conditions or touch several domains are
//! split into sub-tasks that run through the pipeline in dependency order.
//!
//! ```text
//! query ──► ComplexityAnalyzer ──simple──► ExecutionPipeline::run ──► Direct
//!                  │
//!               complex
//!                  ▼
//!             TaskPlanner ──► ExecutionPlan ──► waves of sub-tasks ──► Planned
//! ```

pub mod complexity;
pub mod outcome;
pub mod plan;

pub use complexity::{ComplexityAnalyzer, ComplexityAssessment};
pub use outcome::{HybridResult, PlanResult, TaskOutcome};
pub use plan::{ClausePlanner, ExecutionPlan, PlanError, PlannedTask, TaskPlanner};
