//! Orchestrator Metrics
//!
//! Observability for request processing:
//! - Outcome counts (success, escalated, error) overall and per domain
//! - End-to-end latency and routing confidence distributions
//! - Retries and tokens generated
//! - In-flight requests
//! - Planned (multi-step) requests
//!
//! Everything is lock-free atomics except the per-domain map, which is a
//! `DashMap` so recording never blocks another request.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::pipeline::{ExecutionResult, ExecutionStatus, FailureCause};
use crate::reasoning::PlanResult;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// A histogram over non-negative integer samples
#[derive(Debug)]
pub struct Histogram {
    /// Upper bucket bounds, ascending
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    total_count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given bucket bounds
    ///
    /// Samples above the last bound land in the last bucket.
    #[must_use]
    pub fn new(mut buckets: Vec<u64>) -> Self {
        buckets.sort_unstable();
        buckets.dedup();
        if buckets.is_empty() {
            buckets.push(u64::MAX);
        }
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total_count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Default latency buckets in milliseconds
    #[must_use]
    pub fn latency_default() -> Self {
        Self::new(vec![
            10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000, 60_000, 120_000,
        ])
    }

    /// Record a sample
    pub fn record(&self, value: u64) {
        let last = self.buckets.len() - 1;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(last);

        self.counts[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Drop every sample
    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
        self.total_count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }

    /// Record a duration in milliseconds
    pub fn record_duration(&self, duration: Duration) {
        self.record(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Point-in-time copy
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let total = self.total_count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let mean = if total > 0 {
            sum as f64 / total as f64
        } else {
            0.0
        };

        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts,
            total,
            sum,
            min: if min == u64::MAX { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
            mean,
        }
    }
}

/// Snapshot of histogram data
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Upper bucket bounds
    pub buckets: Vec<u64>,
    /// Samples per bucket
    pub counts: Vec<u64>,
    /// Sample count
    pub total: u64,
    /// Sum of samples
    pub sum: u64,
    /// Smallest sample
    pub min: u64,
    /// Largest sample
    pub max: u64,
    /// Arithmetic mean
    pub mean: f64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket holding the `p` quantile (`p` in `[0, 1]`)
    #[must_use]
    pub fn percentile(&self, p: f64) -> u64 {
        if self.total == 0 {
            return 0;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let target = ((self.total as f64 * p.clamp(0.0, 1.0)).ceil() as u64).max(1);
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                // The last bucket also holds overflow samples
                return if i == self.buckets.len() - 1 {
                    self.buckets[i].max(self.max)
                } else {
                    self.buckets[i]
                };
            }
        }

        self.max
    }

    /// Median
    #[must_use]
    pub fn p50(&self) -> u64 {
        self.percentile(0.5)
    }

    /// 90th percentile
    #[must_use]
    pub fn p90(&self) -> u64 {
        self.percentile(0.9)
    }

    /// 99th percentile
    #[must_use]
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }
}

// ============================================================================
// Counter
// ============================================================================

/// A monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Back to zero
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// Gauge
// ============================================================================

/// A value that goes up and down
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Gauge at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement, saturating at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Domain Metrics
// ============================================================================

/// Metrics for one domain
#[derive(Debug)]
pub struct DomainMetrics {
    /// Domain ID
    pub domain_id: String,
    /// Requests routed to the domain
    pub requests: Counter,
    /// Successful requests
    pub successes: Counter,
    /// Failed requests
    pub failures: Counter,
    /// Requests that failed on a generation timeout
    pub timeouts: Counter,
    /// Retries across all requests
    pub retries: Counter,
    /// Tokens generated
    pub tokens_generated: Counter,
    /// End-to-end latency in milliseconds
    pub latency: Histogram,
}

impl DomainMetrics {
    fn new(domain_id: String) -> Self {
        Self {
            domain_id,
            requests: Counter::new(),
            successes: Counter::new(),
            failures: Counter::new(),
            timeouts: Counter::new(),
            retries: Counter::new(),
            tokens_generated: Counter::new(),
            latency: Histogram::latency_default(),
        }
    }

    /// Failures over requests
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.requests.get();
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.failures.get() as f64 / total as f64;
        rate
    }

    /// Summary
    #[must_use]
    pub fn summary(&self) -> DomainMetricsSummary {
        let latency = self.latency.snapshot();
        DomainMetricsSummary {
            domain_id: self.domain_id.clone(),
            total_requests: self.requests.get(),
            successful_requests: self.successes.get(),
            failed_requests: self.failures.get(),
            timeout_requests: self.timeouts.get(),
            retries: self.retries.get(),
            error_rate: self.error_rate(),
            latency_p50_ms: latency.p50(),
            latency_p90_ms: latency.p90(),
            latency_p99_ms: latency.p99(),
            tokens_generated: self.tokens_generated.get(),
        }
    }
}

/// Summary of one domain's metrics
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
pub struct DomainMetricsSummary {
    pub domain_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub retries: u64,
    pub error_rate: f64,
    pub latency_p50_ms: u64,
    pub latency_p90_ms: u64,
    pub latency_p99_ms: u64,
    pub tokens_generated: u64,
}

// ============================================================================
// Orchestrator Metrics
// ============================================================================

/// Centralized metrics for the orchestrator
#[derive(Debug)]
pub struct OrchestratorMetrics {
    domains: DashMap<String, Arc<DomainMetrics>>,

    /// Requests received
    pub total_requests: Counter,
    /// Requests that succeeded
    pub total_succeeded: Counter,
    /// Requests escalated by the router
    pub total_escalated: Counter,
    /// Requests that failed
    pub total_failed: Counter,
    /// Failures caused by memory pressure
    pub total_exhausted: Counter,
    /// Requests routed by keyword fallback
    pub keyword_fallbacks: Counter,
    /// Requests split into planned sub-tasks
    pub reasoning_requests: Counter,

    /// End-to-end latency in milliseconds
    pub latency: Histogram,
    /// Routing confidence in thousandths
    pub confidence: Histogram,

    /// Requests currently executing
    pub in_flight: Gauge,

    started_at: Instant,
}

impl OrchestratorMetrics {
    /// Create a new collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: DashMap::new(),
            total_requests: Counter::new(),
            total_succeeded: Counter::new(),
            total_escalated: Counter::new(),
            total_failed: Counter::new(),
            total_exhausted: Counter::new(),
            keyword_fallbacks: Counter::new(),
            reasoning_requests: Counter::new(),
            latency: Histogram::latency_default(),
            confidence: Histogram::new(vec![100, 200, 300, 400, 500, 600, 700, 800, 900, 1000]),
            in_flight: Gauge::new(),
            started_at: Instant::now(),
        }
    }

    /// Get or create metrics for a domain
    pub fn domain_metrics(&self, domain_id: &str) -> Arc<DomainMetrics> {
        if let Some(metrics) = self.domains.get(domain_id) {
            return Arc::clone(metrics.value());
        }
        Arc::clone(
            self.domains
                .entry(domain_id.to_string())
                .or_insert_with(|| Arc::new(DomainMetrics::new(domain_id.to_string())))
                .value(),
        )
    }

    /// Record a request entering the orchestrator
    ///
    /// The request counts as in flight until the guard drops, including when
    /// the caller abandons it.
    pub fn begin(&self) -> InFlight<'_> {
        self.total_requests.inc();
        self.in_flight.inc();
        InFlight(&self.in_flight)
    }

    /// Record a terminal result
    pub fn record_result(&self, result: &ExecutionResult) {
        self.latency.record(result.latency_ms());
        self.confidence.record(confidence_milli(result.confidence()));
        self.count_status(result.status());
        if let ExecutionResult::Failed(failed) = result {
            if failed.cause == FailureCause::ResourceExhausted {
                self.total_exhausted.inc();
            }
        }
        self.record_routed(result);
    }

    /// Record a planned request; each task that ran counts toward its
    /// domain, the plan counts once toward the totals
    pub fn record_plan(&self, plan: &PlanResult) {
        self.reasoning_requests.inc();
        self.latency.record(plan.latency_ms);
        self.confidence.record(confidence_milli(plan.confidence()));
        self.count_status(plan.status);
        for result in plan.tasks.iter().filter_map(|t| t.result()) {
            self.record_routed(result);
        }
    }

    fn count_status(&self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Success => self.total_succeeded.inc(),
            ExecutionStatus::Escalated => self.total_escalated.inc(),
            ExecutionStatus::Error => self.total_failed.inc(),
        }
    }

    /// Keyword-fallback and per-domain accounting for one pipeline result
    fn record_routed(&self, result: &ExecutionResult) {
        if result.routing().method == crate::routing::RoutingMethod::KeywordFallback {
            self.keyword_fallbacks.inc();
        }

        match result {
            ExecutionResult::Escalated(_) => {}
            ExecutionResult::Succeeded(ok) => {
                let domain = self.domain_metrics(&ok.domain_id);
                domain.requests.inc();
                domain.successes.inc();
                domain.retries.add(u64::from(ok.retries));
                domain.tokens_generated.add(u64::from(ok.tokens_generated));
                domain.latency.record(ok.latency_ms);
            }
            ExecutionResult::Failed(failed) => {
                let domain = self.domain_metrics(&failed.domain_id);
                domain.requests.inc();
                domain.failures.inc();
                domain.retries.add(u64::from(failed.retries));
                domain.latency.record(failed.latency_ms);
                if failed.cause == FailureCause::GenerationTimeout {
                    domain.timeouts.inc();
                }
            }
        }
    }

    /// Zero every counter and distribution and forget per-domain metrics
    ///
    /// The in-flight gauge and uptime are live values and are kept.
    pub fn reset(&self) {
        self.domains.clear();
        for counter in [
            &self.total_requests,
            &self.total_succeeded,
            &self.total_escalated,
            &self.total_failed,
            &self.total_exhausted,
            &self.keyword_fallbacks,
            &self.reasoning_requests,
        ] {
            counter.reset();
        }
        self.latency.reset();
        self.confidence.reset();
        tracing::info!("Orchestrator statistics reset");
    }

    /// Time since the collector was created
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Summaries for every domain seen so far, sorted by id
    #[must_use]
    pub fn domain_summaries(&self) -> Vec<DomainMetricsSummary> {
        let mut summaries: Vec<_> = self.domains.iter().map(|m| m.summary()).collect();
        summaries.sort_by(|a, b| a.domain_id.cmp(&b.domain_id));
        summaries
    }

    /// Global summary
    #[must_use]
    pub fn summary(&self) -> OrchestratorStats {
        let latency = self.latency.snapshot();
        let confidence = self.confidence.snapshot();
        let domains = self.domain_summaries();
        let completed =
            self.total_succeeded.get() + self.total_escalated.get() + self.total_failed.get();
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if completed == 0 {
            0.0
        } else {
            self.total_succeeded.get() as f64 / completed as f64
        };
        let total_requests = self.total_requests.get();
        #[allow(clippy::cast_precision_loss)]
        let reasoning_rate = if total_requests == 0 {
            0.0
        } else {
            self.reasoning_requests.get() as f64 / total_requests as f64
        };
        OrchestratorStats {
            uptime_seconds: self.uptime().as_secs(),
            total_requests,
            succeeded: self.total_succeeded.get(),
            escalated: self.total_escalated.get(),
            failed: self.total_failed.get(),
            resource_exhausted: self.total_exhausted.get(),
            keyword_fallbacks: self.keyword_fallbacks.get(),
            reasoning_requests: self.reasoning_requests.get(),
            reasoning_rate,
            in_flight: self.in_flight.get(),
            success_rate,
            total_retries: domains.iter().map(|d| d.retries).sum(),
            latency_mean_ms: latency.mean,
            latency_p50_ms: latency.p50(),
            latency_p90_ms: latency.p90(),
            latency_p99_ms: latency.p99(),
            mean_confidence: confidence.mean / 1000.0,
            domains,
        }
    }

    /// Export as Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let _ = write!(
            output,
            "# HELP mdsa_requests_total Requests received\n\
             # TYPE mdsa_requests_total counter\n\
             mdsa_requests_total {}\n\n",
            self.total_requests.get()
        );

        let _ = write!(
            output,
            "# HELP mdsa_results_total Terminal results by status\n\
             # TYPE mdsa_results_total counter\n\
             mdsa_results_total{{status=\"success\"}} {}\n\
             mdsa_results_total{{status=\"escalated\"}} {}\n\
             mdsa_results_total{{status=\"error\"}} {}\n\n",
            self.total_succeeded.get(),
            self.total_escalated.get(),
            self.total_failed.get()
        );

        let _ = write!(
            output,
            "# HELP mdsa_reasoning_requests_total Requests split into planned sub-tasks\n\
             # TYPE mdsa_reasoning_requests_total counter\n\
             mdsa_reasoning_requests_total {}\n\n",
            self.reasoning_requests.get()
        );

        let _ = write!(
            output,
            "# HELP mdsa_in_flight Requests currently executing\n\
             # TYPE mdsa_in_flight gauge\n\
             mdsa_in_flight {}\n\n",
            self.in_flight.get()
        );

        for summary in self.domain_summaries() {
            let id = &summary.domain_id;
            let _ = writeln!(
                output,
                "mdsa_domain_requests_total{{domain=\"{id}\"}} {}",
                summary.total_requests
            );
            let _ = writeln!(
                output,
                "mdsa_domain_errors_total{{domain=\"{id}\"}} {}",
                summary.failed_requests
            );
            let _ = writeln!(
                output,
                "mdsa_domain_latency_p99_ms{{domain=\"{id}\"}} {}",
                summary.latency_p99_ms
            );
            let _ = writeln!(
                output,
                "mdsa_domain_tokens_total{{domain=\"{id}\"}} {}\n",
                summary.tokens_generated
            );
        }

        output
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn confidence_milli(confidence: f32) -> u64 {
    (confidence.clamp(0.0, 1.0) * 1000.0).round() as u64
}

/// In-flight marker returned by [`OrchestratorMetrics::begin`]
#[derive(Debug)]
pub struct InFlight<'a>(&'a Gauge);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics summary
#[derive(Clone, Debug, Serialize)]
#[allow(missing_docs)]
pub struct OrchestratorStats {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub succeeded: u64,
    pub escalated: u64,
    pub failed: u64,
    pub resource_exhausted: u64,
    pub keyword_fallbacks: u64,
    pub reasoning_requests: u64,
    pub reasoning_rate: f64,
    pub in_flight: u64,
    pub success_rate: f64,
    pub total_retries: u64,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: u64,
    pub latency_p90_ms: u64,
    pub latency_p99_ms: u64,
    pub mean_confidence: f64,
    pub domains: Vec<DomainMetricsSummary>,
}
