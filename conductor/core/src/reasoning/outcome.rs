//! Results of planned requests

use std::fmt::Write as _;

use serde::Serialize;

use super::complexity::ComplexityAssessment;
use super::plan::PlannedTask;
use crate::pipeline::{ExecutionResult, ExecutionStatus};

/// What happened to one planned task
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Ran through the pipeline
    Ran {
        /// The task
        task: PlannedTask,
        /// Its terminal result
        result: ExecutionResult,
    },
    /// Not run because a dependency did not succeed
    Skipped {
        /// The task
        task: PlannedTask,
        /// First dependency that did not succeed
        blocked_by: usize,
    },
}

impl TaskOutcome {
    /// The planned task
    #[must_use]
    pub fn task(&self) -> &PlannedTask {
        match self {
            Self::Ran { task, .. } | Self::Skipped { task, .. } => task,
        }
    }

    /// Pipeline result, `None` when skipped
    #[must_use]
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Ran { result, .. } => Some(result),
            Self::Skipped { .. } => None,
        }
    }

    /// Whether the task produced a validated response
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result()
            .is_some_and(|r| r.status() == ExecutionStatus::Success)
    }
}

/// Terminal artifact of a planned request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanResult {
    /// Overall status
    pub status: ExecutionStatus,
    /// Why the query was planned
    pub assessment: ComplexityAssessment,
    /// One outcome per task, in plan order
    pub tasks: Vec<TaskOutcome>,
    /// Why no task ran, when planning itself failed
    pub diagnostic: Option<String>,
    /// End-to-end latency
    pub latency_ms: u64,
}

impl PlanResult {
    /// Result for a plan that could not be produced or checked
    #[must_use]
    pub fn rejected(assessment: ComplexityAssessment, diagnostic: String, latency_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Error,
            assessment,
            tasks: Vec::new(),
            diagnostic: Some(diagnostic),
            latency_ms,
        }
    }

    /// Result for executed tasks
    ///
    /// Success needs every task to succeed. Any failed or skipped task makes
    /// the plan an error; otherwise an escalated task escalates the plan.
    #[must_use]
    pub fn completed(
        assessment: ComplexityAssessment,
        tasks: Vec<TaskOutcome>,
        latency_ms: u64,
    ) -> Self {
        let failed = |t: &TaskOutcome| match t.result() {
            Some(result) => result.status() == ExecutionStatus::Error,
            None => true,
        };
        let status = if tasks.iter().any(failed) {
            ExecutionStatus::Error
        } else if tasks.iter().all(TaskOutcome::succeeded) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Escalated
        };
        Self {
            status,
            assessment,
            tasks,
            diagnostic: None,
            latency_ms,
        }
    }

    /// Responses of successful tasks, one `[task N]` section each
    #[must_use]
    pub fn consolidated_response(&self) -> String {
        let mut out = String::new();
        for outcome in &self.tasks {
            if let Some(text) = outcome.result().and_then(ExecutionResult::response_text) {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                let _ = write!(out, "[task {}] {text}", outcome.task().task_id);
            }
        }
        out
    }

    /// Lowest routing confidence among tasks that ran
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.tasks
            .iter()
            .filter_map(TaskOutcome::result)
            .map(ExecutionResult::confidence)
            .reduce(f32::min)
            .unwrap_or(0.0)
    }

    /// Retries across all tasks
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.tasks
            .iter()
            .filter_map(TaskOutcome::result)
            .map(ExecutionResult::retries)
            .sum()
    }

    /// Tasks that did not run
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.tasks.iter().filter(|t| t.result().is_none()).count()
    }
}

/// Either a single routed result or a planned one
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum HybridResult {
    /// Routed whole through the pipeline
    Direct(ExecutionResult),
    /// Split into planned tasks
    Planned(PlanResult),
}

impl HybridResult {
    /// Overall status
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Direct(result) => result.status(),
            Self::Planned(plan) => plan.status,
        }
    }

    /// End-to-end latency
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        match self {
            Self::Direct(result) => result.latency_ms(),
            Self::Planned(plan) => plan.latency_ms,
        }
    }

    /// Whether the query went through the planner
    #[must_use]
    pub fn is_planned(&self) -> bool {
        matches!(self, Self::Planned(_))
    }
}
