//! # Metrics and Monitoring
//!
//! Counters and histograms for lifecycle, solver and orchestrator activity.
//! A `Metrics` handle is created once at startup and passed to every component
//! that records into it; there is no global registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::TenantId;

/// Default latency bucket boundaries in milliseconds
pub const LATENCY_BUCKETS_MS: [f64; 12] = [
    1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0,
];

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Lifecycle metrics
    transitions: AtomicU64,
    ticks_skipped: AtomicU64,
    activities_indexed: AtomicU64,
    migrations: AtomicU64,
    tiers_released: AtomicU64,
    handles_acquired: AtomicU64,
    handles_rejected: AtomicU64,
    merge_budget_denials: AtomicU64,

    // Solver metrics
    solver_calls: AtomicU64,
    attempts: AtomicU64,
    attempt_failures: AtomicU64,
    escalations: AtomicU64,
    solver_successes: AtomicU64,
    fatal_timeouts: AtomicU64,
    attempts_cancelled: AtomicU64,

    // Orchestrator metrics
    queries: AtomicU64,
    partial_results: AtomicU64,
    early_terminations: AtomicU64,

    tenants: RwLock<HashMap<TenantId, Arc<TenantCounters>>>,
    query_latency: Histogram,
    partition_latency: Histogram,
}

/// Per-tenant query counters
#[derive(Default)]
pub struct TenantCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    abandoned: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                transitions: AtomicU64::new(0),
                ticks_skipped: AtomicU64::new(0),
                activities_indexed: AtomicU64::new(0),
                migrations: AtomicU64::new(0),
                tiers_released: AtomicU64::new(0),
                handles_acquired: AtomicU64::new(0),
                handles_rejected: AtomicU64::new(0),
                merge_budget_denials: AtomicU64::new(0),
                solver_calls: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                attempt_failures: AtomicU64::new(0),
                escalations: AtomicU64::new(0),
                solver_successes: AtomicU64::new(0),
                fatal_timeouts: AtomicU64::new(0),
                attempts_cancelled: AtomicU64::new(0),
                queries: AtomicU64::new(0),
                partial_results: AtomicU64::new(0),
                early_terminations: AtomicU64::new(0),
                tenants: RwLock::new(HashMap::new()),
                query_latency: Histogram::new(LATENCY_BUCKETS_MS.to_vec()),
                partition_latency: Histogram::new(LATENCY_BUCKETS_MS.to_vec()),
            }),
        }
    }

    pub fn record_transition(&self) {
        self.inner.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.inner.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_indexed(&self, count: u64) {
        self.inner.activities_indexed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_migration(&self) {
        self.inner.migrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tier_released(&self) {
        self.inner.tiers_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handle_acquired(&self) {
        self.inner.handles_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handle_rejected(&self) {
        self.inner.handles_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge_budget_denial(&self) {
        self.inner.merge_budget_denials.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_solver_call(&self) {
        self.inner.solver_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt_failure(&self) {
        self.inner.attempt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.inner.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_solver_success(&self, elapsed: Duration) {
        self.inner.solver_successes.fetch_add(1, Ordering::Relaxed);
        self.inner.partition_latency.record(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_fatal_timeout(&self) {
        self.inner.fatal_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempts_cancelled(&self, count: u64) {
        self.inner.attempts_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_early_termination(&self) {
        self.inner.early_terminations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished cross-partition query for `tenant`
    pub fn record_query(&self, tenant: &TenantId, outcome: QueryOutcome, elapsed: Duration) {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
        self.inner.query_latency.record(elapsed.as_secs_f64() * 1000.0);

        let counters = self.tenant(tenant);
        counters.calls.fetch_add(1, Ordering::Relaxed);
        match outcome {
            QueryOutcome::Success => {
                counters.successes.fetch_add(1, Ordering::Relaxed);
            }
            QueryOutcome::Failure => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            QueryOutcome::Abandoned => {
                self.inner.partial_results.fetch_add(1, Ordering::Relaxed);
                counters.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn tenant(&self, tenant: &TenantId) -> Arc<TenantCounters> {
        if let Some(counters) = self.inner.tenants.read().get(tenant) {
            return Arc::clone(counters);
        }
        let mut tenants = self.inner.tenants.write();
        Arc::clone(tenants.entry(tenant.clone()).or_default())
    }

    pub fn tenant_snapshot(&self, tenant: &TenantId) -> TenantSnapshot {
        match self.inner.tenants.read().get(tenant) {
            Some(counters) => TenantSnapshot {
                calls: counters.calls.load(Ordering::Relaxed),
                successes: counters.successes.load(Ordering::Relaxed),
                failures: counters.failures.load(Ordering::Relaxed),
                abandoned: counters.abandoned.load(Ordering::Relaxed),
            },
            None => TenantSnapshot::default(),
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            transitions: inner.transitions.load(Ordering::Relaxed),
            ticks_skipped: inner.ticks_skipped.load(Ordering::Relaxed),
            activities_indexed: inner.activities_indexed.load(Ordering::Relaxed),
            migrations: inner.migrations.load(Ordering::Relaxed),
            tiers_released: inner.tiers_released.load(Ordering::Relaxed),
            handles_acquired: inner.handles_acquired.load(Ordering::Relaxed),
            handles_rejected: inner.handles_rejected.load(Ordering::Relaxed),
            merge_budget_denials: inner.merge_budget_denials.load(Ordering::Relaxed),
            solver_calls: inner.solver_calls.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            attempt_failures: inner.attempt_failures.load(Ordering::Relaxed),
            escalations: inner.escalations.load(Ordering::Relaxed),
            solver_successes: inner.solver_successes.load(Ordering::Relaxed),
            fatal_timeouts: inner.fatal_timeouts.load(Ordering::Relaxed),
            attempts_cancelled: inner.attempts_cancelled.load(Ordering::Relaxed),
            queries: inner.queries.load(Ordering::Relaxed),
            partial_results: inner.partial_results.load(Ordering::Relaxed),
            early_terminations: inner.early_terminations.load(Ordering::Relaxed),
            query_latency: inner.query_latency.stats(),
            partition_latency: inner.partition_latency.stats(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// How a cross-partition query ended, for per-tenant accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Success,
    /// No partition produced an answer
    Failure,
    /// Sweep truncated by a fatal partition timeout
    Abandoned,
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub transitions: u64,
    pub ticks_skipped: u64,
    pub activities_indexed: u64,
    pub migrations: u64,
    pub tiers_released: u64,
    pub handles_acquired: u64,
    pub handles_rejected: u64,
    pub merge_budget_denials: u64,
    pub solver_calls: u64,
    pub attempts: u64,
    pub attempt_failures: u64,
    pub escalations: u64,
    pub solver_successes: u64,
    pub fatal_timeouts: u64,
    pub attempts_cancelled: u64,
    pub queries: u64,
    pub partial_results: u64,
    pub early_terminations: u64,
    pub query_latency: HistogramStats,
    pub partition_latency: HistogramStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantSnapshot {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub abandoned: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Start new timer
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}

/// Histogram for tracking value distributions
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create new histogram with bucket boundaries
    pub fn new(boundaries: Vec<f64>) -> Self {
        let buckets = boundaries
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value
    pub fn record(&self, value: f64) {
        self.sum.fetch_add(value.max(0.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (boundary, count) in &self.buckets {
            if value <= *boundary {
                count.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    /// Get histogram statistics
    pub fn stats(&self) -> HistogramStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramStats {
            count,
            sum,
            mean: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            buckets: self
                .buckets
                .iter()
                .map(|(b, c)| (*b, c.load(Ordering::Relaxed)))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }
}

/// Histogram statistics
#[derive(Debug, Clone)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: u64,
    pub mean: f64,
    pub buckets: Vec<(f64, u64)>,
    pub overflow: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets() {
        let histogram = Histogram::new(vec![10.0, 100.0]);
        histogram.record(5.0);
        histogram.record(50.0);
        histogram.record(500.0);

        let stats = histogram.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.buckets, vec![(10.0, 1), (100.0, 1)]);
        assert_eq!(stats.overflow, 1);
    }

    #[test]
    fn test_tenant_counters() {
        let metrics = Metrics::new();
        let tenant = TenantId::new("acme");
        metrics.record_query(&tenant, QueryOutcome::Success, Duration::from_millis(3));
        metrics.record_query(&tenant, QueryOutcome::Abandoned, Duration::from_millis(30));

        let snapshot = metrics.tenant_snapshot(&tenant);
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(metrics.snapshot().partial_results, 1);
        assert_eq!(metrics.tenant_snapshot(&TenantId::new("other")), TenantSnapshot::default());
    }
}
