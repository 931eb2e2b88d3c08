//! # Cross-Partition Orchestrator
//!
//! Drives the replica solver across the ordered partition sequence for one
//! logical query, newest partition first, under one global deadline.
//!
//! ```text
//!   ordering ──> [p9, p8, p7, ...]  (descending partition id)
//!                  │
//!                  ▼
//!   ┌──────────────────────────────┐
//!   │ solve(replicas of p) ────────┼── None ──> stop, partial
//!   │ merge(accumulated, answer)   │
//!   │ evaluator says done? ────────┼── yes ──> stop, early
//!   └──────────────┬───────────────┘
//!                  ▼ next partition
//!   done(merged) ──> OrchestratorResult
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use strata_core::{
    config::{Config, OrchestratorConfig},
    error::Error,
    metrics::{Metrics, QueryOutcome},
    traits::{LatencyHistory, NoLatencyHistory, PartitionOrderingProvider, SchemaRegistry},
    PartitionCoordinate, PartitionId, TenantId,
};

use crate::log::SolutionLog;
use crate::merge::{Done, Evaluator, Merger};
use crate::solvable::Solvable;
use crate::solver::ReplicaSolver;

/// One logical query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub tenant: TenantId,
    /// Identifies the query shape for latency history
    pub query_key: String,
    /// Overrides the configured global timeout
    pub global_timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(tenant: TenantId, query_key: impl Into<String>) -> Self {
        Self {
            tenant,
            query_key: query_key.into(),
            global_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }
}

/// Builds the attempt against one replica; called only when the attempt is submitted
pub trait SolvableFactory<A: Send + 'static>: Send + Sync {
    fn solvable(&self, coordinate: &PartitionCoordinate) -> Arc<dyn Solvable<A>>;
}

impl<A, F> SolvableFactory<A> for F
where
    A: Send + 'static,
    F: Fn(&PartitionCoordinate) -> Arc<dyn Solvable<A>> + Send + Sync,
{
    fn solvable(&self, coordinate: &PartitionCoordinate) -> Arc<dyn Solvable<A>> {
        self(coordinate)
    }
}

/// Provenance of one answered partition
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub partition_id: PartitionId,
    pub coordinate: PartitionCoordinate,
    pub tried_coordinates: Vec<PartitionCoordinate>,
    pub elapsed_to_first_usable_result: Duration,
    pub elapsed_total: Duration,
}

#[derive(Debug)]
pub struct OrchestratorResult<A> {
    pub query_id: Uuid,
    pub merged_answer: Option<A>,
    /// In visit order
    pub per_partition_outcomes: Vec<PartitionOutcome>,
    pub total_elapsed: Duration,
    /// The sweep stopped on a fatal partition timeout
    pub partial: bool,
    /// Every available partition answered and none was skipped by early termination
    pub results_exhausted: bool,
    /// `false` only when the schema registry reports no schema for the tenant
    pub schema_registered: bool,
    pub log: SolutionLog,
}

pub struct CrossPartitionOrchestrator {
    solver: ReplicaSolver,
    ordering: Arc<dyn PartitionOrderingProvider>,
    latency: Arc<dyn LatencyHistory>,
    schemas: Option<Arc<dyn SchemaRegistry>>,
    config: OrchestratorConfig,
    metrics: Metrics,
}

impl CrossPartitionOrchestrator {
    pub fn new(config: &Config, ordering: Arc<dyn PartitionOrderingProvider>, metrics: Metrics) -> Self {
        Self {
            solver: ReplicaSolver::new(config.solver.clone(), metrics.clone()),
            ordering,
            latency: Arc::new(NoLatencyHistory),
            schemas: None,
            config: config.orchestrator.clone(),
            metrics,
        }
    }

    pub fn with_latency_history(mut self, latency: Arc<dyn LatencyHistory>) -> Self {
        self.latency = latency;
        self
    }

    /// Answer "schema not registered" for tenants unknown to `schemas`
    pub fn with_schema_registry(mut self, schemas: Arc<dyn SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn solver(&self) -> &ReplicaSolver {
        &self.solver
    }

    /// Sweep the tenant's partitions newest-first, merging answers until the
    /// evaluator is satisfied, a partition times out fatally, or partitions
    /// run out. A failing ordering provider or schema registry yields a
    /// `partial` result with the failure in its log.
    pub async fn ask_and_merge<A, F, M, E, D>(
        &self,
        request: &QueryRequest,
        factory: &F,
        merger: &M,
        evaluator: &E,
        done: &D,
    ) -> OrchestratorResult<A>
    where
        A: Send + 'static,
        F: SolvableFactory<A> + ?Sized,
        M: Merger<A> + ?Sized,
        E: Evaluator<A> + ?Sized,
        D: Done<A> + ?Sized,
    {
        let started = Instant::now();
        let query_id = Uuid::new_v4();
        let log = SolutionLog::new(query_id, self.config.log_enabled);
        let deadline = started + request.global_timeout.unwrap_or(self.config.global_timeout);
        let tenant = &request.tenant;

        if let Some(schemas) = &self.schemas {
            match schemas.has_schema(tenant).await {
                Ok(true) => {}
                Ok(false) => {
                    let unavailable = Error::SchemaUnavailable { tenant: tenant.clone() };
                    info!(%tenant, %query_id, code = unavailable.error_code(), "Query for tenant without registered schema");
                    log.record(unavailable.to_string());
                    return self.unanswered(tenant, started, log, done, false, false);
                }
                Err(e) => {
                    warn!(%tenant, %query_id, code = e.error_code(), "Schema lookup failed: {}", e);
                    log.record(format!("schema lookup failed: {}", e));
                    return self.unanswered(tenant, started, log, done, true, true);
                }
            }
        }

        let mut partitions = match self.ordering.ordered_partitions_for(tenant, &request.query_key).await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(%tenant, %query_id, code = e.error_code(), "Partition ordering failed: {}", e);
                log.record(format!("partition ordering failed: {}", e));
                return self.unanswered(tenant, started, log, done, true, true);
            }
        };
        partitions.sort_by(|a, b| b.partition_id.cmp(&a.partition_id));
        partitions.retain(|partition| {
            if partition.replicas.is_empty() {
                log.record(format!("skipping partition {}: no replicas", partition.partition_id));
                return false;
            }
            true
        });
        debug!(%query_id, %tenant, partitions = partitions.len(), "Starting partition sweep");

        let mut merged: Option<A> = None;
        let mut outcomes = Vec::with_capacity(partitions.len());
        let mut partial = false;
        let mut terminated_early = false;

        for partition in &partitions {
            let escalation = self
                .latency
                .suggest_timeout(tenant, partition.partition_id, &request.query_key)
                .unwrap_or(self.config.default_partition_timeout);
            log.record(format!(
                "partition {}: {} replicas, escalation {:?}",
                partition.partition_id,
                partition.replicas.len(),
                escalation
            ));

            let solvables = partition
                .replicas
                .iter()
                .map(|coordinate| factory.solvable(coordinate));
            let Some(outcome) = self.solver.solve(solvables, Some(escalation), deadline, &log).await else {
                warn!(
                    %query_id,
                    %tenant,
                    partition = %partition.partition_id,
                    "Fatal partition timeout, abandoning sweep"
                );
                log.record(format!("partition {} timed out fatally", partition.partition_id));
                partial = true;
                break;
            };

            self.latency.record(
                tenant,
                partition.partition_id,
                &request.query_key,
                outcome.elapsed_to_first_usable_result,
            );
            outcomes.push(PartitionOutcome {
                partition_id: partition.partition_id,
                coordinate: outcome.coordinate,
                tried_coordinates: outcome.tried_coordinates,
                elapsed_to_first_usable_result: outcome.elapsed_to_first_usable_result,
                elapsed_total: outcome.elapsed_total,
            });

            let accumulated = merger.merge(merged.take(), outcome.answer, &log);
            let satisfied = evaluator.is_done(&accumulated, &log);
            merged = Some(accumulated);
            if satisfied {
                log.record(format!("satisfied after partition {}", partition.partition_id));
                self.metrics.record_early_termination();
                terminated_early = true;
                break;
            }
        }

        let total_elapsed = started.elapsed();
        let query_outcome = if partial {
            QueryOutcome::Abandoned
        } else if merged.is_none() {
            QueryOutcome::Failure
        } else {
            QueryOutcome::Success
        };
        self.metrics.record_query(tenant, query_outcome, total_elapsed);
        debug!(
            %query_id,
            answered = outcomes.len(),
            partial,
            elapsed_ms = total_elapsed.as_millis() as u64,
            "Partition sweep finished"
        );

        OrchestratorResult {
            query_id,
            merged_answer: done.finish(merged, &log),
            per_partition_outcomes: outcomes,
            total_elapsed,
            partial,
            results_exhausted: !partial && !terminated_early,
            schema_registered: true,
            log,
        }
    }

    /// Result for a query that never reached the partition sweep
    fn unanswered<A, D>(
        &self,
        tenant: &TenantId,
        started: Instant,
        log: SolutionLog,
        done: &D,
        partial: bool,
        schema_registered: bool,
    ) -> OrchestratorResult<A>
    where
        D: Done<A> + ?Sized,
    {
        let total_elapsed = started.elapsed();
        self.metrics.record_query(tenant, QueryOutcome::Failure, total_elapsed);
        OrchestratorResult {
            query_id: log.query_id(),
            merged_answer: done.finish(None, &log),
            per_partition_outcomes: Vec::new(),
            total_elapsed,
            partial,
            results_exhausted: false,
            schema_registered,
            log,
        }
    }
}
