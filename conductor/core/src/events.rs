//! Monitoring Events
//!
//! One [`MonitoringEvent`] is emitted per completed request. Sinks are
//! fire-and-forget: `emit` is synchronous and must not block, so a slow or
//! absent collector can never stall the pipeline.
//!
//! # Sinks
//!
//! - [`ChannelSink`] - bounded tokio channel, drops when full
//! - [`TracingSink`] - structured `tracing` record
//! - [`NoopSink`] - discards everything

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::pipeline::{ExecutionResult, ExecutionStatus};
use crate::reasoning::PlanResult;

/// Completed-request record for the external monitoring collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    /// Correlation ID shared with the request's tracing span
    pub correlation_id: Uuid,
    /// Query text as received
    pub query: String,
    /// Domain that handled the request (`None` when escalated)
    pub domain_id: Option<String>,
    /// Backend that served the request (`None` when escalated)
    pub backend_id: Option<String>,
    /// Terminal status
    pub status: ExecutionStatus,
    /// End-to-end latency
    pub latency_ms: u64,
    /// Routing confidence; the lowest task confidence for planned requests
    pub confidence: f32,
    /// Sub-tasks of a planned request, zero when routed whole
    #[serde(default)]
    pub sub_tasks: usize,
    /// When the request completed
    pub completed_at: DateTime<Utc>,
}

impl MonitoringEvent {
    /// Build the event for `result`
    pub fn from_result(
        correlation_id: Uuid,
        query: impl Into<String>,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            correlation_id,
            query: query.into(),
            domain_id: result.domain_id().map(str::to_string),
            backend_id: result.backend_id().map(str::to_string),
            status: result.status(),
            latency_ms: result.latency_ms(),
            confidence: result.confidence(),
            sub_tasks: 0,
            completed_at: Utc::now(),
        }
    }

    /// Build the event for a planned request
    ///
    /// Domain and backend are set only when every task that ran used the
    /// same one.
    pub fn from_plan(correlation_id: Uuid, query: impl Into<String>, plan: &PlanResult) -> Self {
        let ran: Vec<&ExecutionResult> = plan.tasks.iter().filter_map(|t| t.result()).collect();
        let shared = |pick: fn(&ExecutionResult) -> Option<&str>| {
            let first = ran.first().and_then(|r| pick(r))?;
            ran.iter()
                .all(|r| pick(r) == Some(first))
                .then(|| first.to_string())
        };
        Self {
            correlation_id,
            query: query.into(),
            domain_id: shared(ExecutionResult::domain_id),
            backend_id: shared(ExecutionResult::backend_id),
            status: plan.status,
            latency_ms: plan.latency_ms,
            confidence: plan.confidence(),
            sub_tasks: plan.tasks.len(),
            completed_at: Utc::now(),
        }
    }
}

/// Receiver of monitoring events
pub trait MonitoringSink: Send + Sync {
    /// Hand off one event without blocking
    fn emit(&self, event: MonitoringEvent);
}

/// Sink that discards events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MonitoringSink for NoopSink {
    fn emit(&self, _event: MonitoringEvent) {}
}

/// Sink that logs each event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MonitoringSink for TracingSink {
    fn emit(&self, event: MonitoringEvent) {
        tracing::info!(
            target: "mdsa::monitoring",
            correlation_id = %event.correlation_id,
            domain = event.domain_id.as_deref().unwrap_or("-"),
            backend = event.backend_id.as_deref().unwrap_or("-"),
            status = %event.status,
            latency_ms = event.latency_ms,
            confidence = event.confidence,
            "Request completed"
        );
    }
}

/// Sink that forwards events over a bounded channel
///
/// When the channel is full or closed the event is dropped and counted.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<MonitoringEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Sink plus the receiving end, holding at most `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MonitoringEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    /// Sink sized by `[orchestrator] event_buffer`
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> (Self, mpsc::Receiver<MonitoringEvent>) {
        Self::new(config.event_buffer)
    }

    /// Wrap an existing sender
    #[must_use]
    pub fn from_sender(tx: mpsc::Sender<MonitoringEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events lost to a full or closed channel
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl MonitoringSink for ChannelSink {
    fn emit(&self, event: MonitoringEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(dropped = total, "Monitoring channel full, event dropped");
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!(dropped = total, "Monitoring channel closed, event dropped");
                }
            }
        }
    }
}
