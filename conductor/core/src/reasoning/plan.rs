//! Execution plans
//!
//! A [`TaskPlanner`] splits a complex query into [`PlannedTask`]s.
//! [`ExecutionPlan::new`] checks the dependency graph and groups the tasks
//! into waves: every task in a wave depends only on tasks of earlier waves,
//! so a wave can run concurrently.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::complexity::ComplexityAssessment;
use crate::config::ReasoningConfig;
use crate::routing::keywords::tokenize;

/// Words that join independent requests
const CONJUNCTIONS: [&str; 3] = ["and", "also", "plus"];

/// One sub-query of a plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    /// Identifier, unique within its plan
    pub task_id: usize,
    /// Text routed and executed on its own
    pub query: String,
    /// Tasks that must succeed first
    pub dependencies: Vec<usize>,
}

impl PlannedTask {
    /// Task with no dependencies
    pub fn new(task_id: usize, query: impl Into<String>) -> Self {
        Self {
            task_id,
            query: query.into(),
            dependencies: Vec::new(),
        }
    }

    /// Require `task_id` to succeed first
    #[must_use]
    pub fn after(mut self, task_id: usize) -> Self {
        self.dependencies.push(task_id);
        self
    }
}

/// Errors producing or checking a plan
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Planner returned nothing
    #[error("plan has no tasks")]
    Empty,

    /// More tasks than `reasoning.max_tasks`
    #[error("plan has {count} tasks, limit is {limit}")]
    TooManyTasks {
        /// Tasks planned
        count: usize,
        /// Configured limit
        limit: usize,
    },

    /// Two tasks share an id
    #[error("duplicate task id {0}")]
    DuplicateTask(usize),

    /// Dependency on a task that is not in the plan
    #[error("task {task_id} dependency {dependency} not satisfied")]
    UnknownDependency {
        /// Dependent task
        task_id: usize,
        /// Missing task
        dependency: usize,
    },

    /// Dependencies loop back on themselves
    #[error("task {0} is part of a dependency cycle")]
    Cycle(usize),

    /// Planner could not produce a plan
    #[error("planner failed: {0}")]
    Planner(String),
}

/// Checked plan with its tasks grouped into waves
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    tasks: Vec<PlannedTask>,
    /// Indices into `tasks`, one vector per wave
    waves: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Check `tasks` and order them into waves
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] when the plan is empty, larger than `max_tasks`,
    /// reuses an id, names a missing dependency or contains a cycle.
    pub fn new(tasks: Vec<PlannedTask>, max_tasks: usize) -> Result<Self, PlanError> {
        if tasks.is_empty() {
            return Err(PlanError::Empty);
        }
        if tasks.len() > max_tasks {
            return Err(PlanError::TooManyTasks {
                count: tasks.len(),
                limit: max_tasks,
            });
        }

        let mut index: HashMap<usize, usize> = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.task_id, i).is_some() {
                return Err(PlanError::DuplicateTask(task.task_id));
            }
        }
        for task in &tasks {
            if let Some(&dependency) = task.dependencies.iter().find(|d| !index.contains_key(*d)) {
                return Err(PlanError::UnknownDependency {
                    task_id: task.task_id,
                    dependency,
                });
            }
        }

        let mut placed: HashSet<usize> = HashSet::with_capacity(tasks.len());
        let mut waves = Vec::new();
        while placed.len() < tasks.len() {
            let wave: Vec<usize> = tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| !placed.contains(&t.task_id))
                .filter(|(_, t)| t.dependencies.iter().all(|d| placed.contains(d)))
                .map(|(i, _)| i)
                .collect();

            if wave.is_empty() {
                let stuck = tasks
                    .iter()
                    .find(|t| !placed.contains(&t.task_id))
                    .map_or(0, |t| t.task_id);
                return Err(PlanError::Cycle(stuck));
            }
            placed.extend(wave.iter().map(|&i| tasks[i].task_id));
            waves.push(wave);
        }

        Ok(Self { tasks, waves })
    }

    /// Tasks in planner order
    #[must_use]
    pub fn tasks(&self) -> &[PlannedTask] {
        &self.tasks
    }

    /// Tasks grouped by wave, earliest first
    pub fn waves(&self) -> impl Iterator<Item = Vec<&PlannedTask>> + '_ {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&i| &self.tasks[i]).collect())
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always false for a checked plan
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Splits a complex query into sub-tasks
///
/// The built-in [`ClausePlanner`] is rule based; a model-backed planner can
/// be plugged in through [`crate::OrchestratorBuilder::planner`].
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    /// Plan `query`, already judged complex by `assessment`
    async fn plan(
        &self,
        query: &str,
        assessment: &ComplexityAssessment,
    ) -> Result<Vec<PlannedTask>, PlanError>;
}

/// Splits on sequential connectives, and on conjunctions when the query
/// spans several domains
///
/// A clause that follows a sequential connective depends on the clause
/// before it. Clauses joined by a conjunction are independent. Clauses past
/// `max_tasks` are folded into the last task.
#[derive(Clone, Debug)]
pub struct ClausePlanner {
    /// Tokenized sequential connectives, longest first
    sequential: Vec<Vec<String>>,
    max_tasks: usize,
}

impl ClausePlanner {
    /// Planner splitting on `config.sequential_indicators`
    #[must_use]
    pub fn new(config: &ReasoningConfig) -> Self {
        let mut sequential: Vec<Vec<String>> = config
            .sequential_indicators
            .iter()
            .map(|p| tokenize(p))
            .filter(|p| !p.is_empty())
            .collect();
        sequential.sort_by_key(|p| std::cmp::Reverse(p.len()));
        Self {
            sequential,
            max_tasks: config.max_tasks.max(1),
        }
    }

    /// Split `query` into clauses, each flagged when it depends on the one
    /// before it
    fn clauses(&self, query: &str, split_conjunctions: bool) -> Vec<(String, bool)> {
        let words: Vec<&str> = query.split_whitespace().collect();
        let normalized: Vec<String> = words.iter().map(|w| tokenize(w).join(" ")).collect();

        let mut clauses: Vec<(String, bool)> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut depends = false;
        let mut i = 0;

        while i < words.len() {
            let connective = self
                .sequential
                .iter()
                .find(|phrase| {
                    normalized.get(i..i + phrase.len()).is_some_and(|w| w == phrase.as_slice())
                })
                .map(|phrase| (phrase.len(), true))
                .or_else(|| {
                    (split_conjunctions && CONJUNCTIONS.contains(&normalized[i].as_str()))
                        .then_some((1, false))
                });

            match connective {
                Some((width, sequential)) => {
                    if current.is_empty() {
                        depends |= sequential;
                    } else {
                        push_clause(&mut clauses, &current, depends);
                        current.clear();
                        depends = sequential;
                    }
                    i += width;
                }
                None => {
                    current.push(words[i]);
                    i += 1;
                }
            }
        }
        push_clause(&mut clauses, &current, depends);
        clauses
    }
}

fn push_clause(clauses: &mut Vec<(String, bool)>, words: &[&str], depends: bool) {
    let text = words
        .join(" ")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
        .to_string();
    if !tokenize(&text).is_empty() {
        clauses.push((text, depends && !clauses.is_empty()));
    }
}

#[async_trait]
impl TaskPlanner for ClausePlanner {
    async fn plan(
        &self,
        query: &str,
        assessment: &ComplexityAssessment,
    ) -> Result<Vec<PlannedTask>, PlanError> {
        let mut clauses = self.clauses(query, assessment.spans_domains());
        if clauses.is_empty() {
            return Err(PlanError::Empty);
        }
        if clauses.len() > self.max_tasks {
            let tail: Vec<String> = clauses
                .split_off(self.max_tasks - 1)
                .into_iter()
                .map(|(text, _)| text)
                .collect();
            let depends = clauses.last().is_some();
            clauses.push((tail.join(", then "), depends));
        }

        Ok(clauses
            .into_iter()
            .enumerate()
            .map(|(i, (text, depends))| {
                let task = PlannedTask::new(i + 1, text);
                if depends {
                    task.after(i)
                } else {
                    task
                }
            })
            .collect())
    }
}
