//! In-process cluster built from the in-memory collaborators.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use strata_core::{
    Activity, Config, HostId, LifecycleState, Metrics, PartitionCoordinate, PartitionId, TenantId,
};
use strata_query::{
    CrossPartitionOrchestrator, LimitEvaluator, LocalSolvableFactory, LogEntry, OrDefault,
    QueryRequest, RollingLatencyHistory, UnionMerger,
};
use strata_storage::{HostDirectory, HostedPartitionOrdering, InMemoryCollaborators, PartitionHost};

const TERMS: [&str; 5] = ["login", "logout", "upload", "download", "delete"];
const USERS: [&str; 4] = ["alice", "bob", "carol", "dave"];

pub struct Simulation {
    config: Config,
    collaborators: Arc<InMemoryCollaborators>,
    directory: Arc<HostDirectory>,
    tenant: TenantId,
    metrics: Metrics,
    latency: Arc<RollingLatencyHistory>,
}

impl Simulation {
    /// `hosts` hosts, every partition replicated on all of them
    pub fn new(config: Config, hosts: usize, tenant: &str) -> Self {
        let collaborators = Arc::new(InMemoryCollaborators::new());
        let directory = Arc::new(HostDirectory::new());
        let metrics = Metrics::new();
        for n in 1..=hosts {
            let host = PartitionHost::new(
                HostId::new(format!("host-{}", n)),
                &config,
                collaborators.clone(),
                metrics.clone(),
            )
            .with_manual_ticks();
            directory.register(Arc::new(host));
        }

        let tenant = TenantId::new(tenant);
        collaborators.schemas().register(tenant.clone());
        Self {
            config,
            collaborators,
            directory,
            tenant,
            metrics,
            latency: Arc::new(RollingLatencyHistory::default()),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Observe partitions `1..=partitions` on every host and fill each
    /// partition's activity log with `activities` synthetic records.
    pub fn populate(&self, partitions: u64, activities: usize, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for partition in (1..=partitions).map(PartitionId) {
            for host in self.directory.hosts() {
                let lifecycle = host.observe(&self.tenant, partition);
                self.collaborators.topology().activate(lifecycle.coordinate());
            }

            let log = self.collaborators.activity_log(&self.tenant, partition);
            for _ in 0..activities {
                let term = TERMS[rng.gen_range(0..TERMS.len())];
                let user = USERS[rng.gen_range(0..USERS.len())];
                log.append(&[term, user], format!("{} {} (partition {})", user, term, partition));
            }
        }
        info!(tenant = %self.tenant, partitions, activities, "Populated simulated cluster");
    }

    /// Run `rounds` of maintenance ticks on every host
    pub async fn tick(&self, rounds: usize) -> usize {
        let mut failures = 0;
        for _ in 0..rounds {
            for host in self.directory.hosts() {
                failures += host.tick_all().await;
            }
        }
        if failures > 0 {
            warn!(failures, "Maintenance ticks reported failures");
        }
        failures
    }

    pub fn host(&self, host: &str) -> Result<Arc<PartitionHost>> {
        self.directory
            .get(&HostId::new(host))
            .ok_or_else(|| anyhow!("unknown host {}", host))
    }

    pub fn coordinate(&self, host: &str, partition: u64) -> PartitionCoordinate {
        PartitionCoordinate::new(self.tenant.clone(), PartitionId(partition), HostId::new(host))
    }

    /// Drop a host from the cluster, destroying its partitions
    pub async fn remove_host(&self, host: &str) -> Result<usize> {
        let removed = self.host(host)?;
        let destroyed = removed.remove_host().await?;
        self.directory.deregister(removed.host_id());
        self.collaborators.topology().remove_host(removed.host_id());
        Ok(destroyed)
    }

    /// Take one replica offline and drop it from the topology registry
    pub async fn remove_topology_entry(&self, host: &str, partition: u64) -> Result<bool> {
        let coordinate = self.coordinate(host, partition);
        let changed = self.host(host)?.remove_topology_entry(&coordinate).await?;
        self.collaborators.topology().remove(&coordinate);
        Ok(changed)
    }

    pub fn partition_table(&self) -> Vec<PartitionRow> {
        let mut rows = Vec::new();
        for host in self.directory.hosts() {
            for (coordinate, state) in host.states() {
                rows.push(PartitionRow {
                    host: coordinate.host_id.to_string(),
                    partition: coordinate.partition_id.0,
                    state: state.lifecycle_state,
                    tier: state.storage_tier.as_str(),
                    last_indexed_sequence: state.last_indexed_sequence,
                });
            }
        }
        rows
    }

    /// Newest activities carrying `term`, across all partitions
    pub async fn query(&self, term: &str, limit: usize) -> Result<QuerySummary> {
        let tolerate = self.config.lifecycle.tolerate_rebuilding_reads;
        let ordering = Arc::new(HostedPartitionOrdering::new(self.directory.clone(), tolerate));
        let orchestrator = CrossPartitionOrchestrator::new(&self.config, ordering, self.metrics.clone())
            .with_latency_history(self.latency.clone())
            .with_schema_registry(self.collaborators.schemas().clone());

        let factory = LocalSolvableFactory::new(self.directory.clone(), term, limit).tolerate_rebuilding(tolerate);
        let merger = UnionMerger::by_key(|activity: &Activity| activity.payload.clone());
        let result = orchestrator
            .ask_and_merge(
                &QueryRequest::new(self.tenant.clone(), term),
                &factory,
                &merger,
                &LimitEvaluator::new(limit),
                &OrDefault::new(Vec::new()),
            )
            .await;

        let mut matches = result.merged_answer.unwrap_or_default();
        matches.truncate(limit);
        Ok(QuerySummary {
            query_id: result.query_id.to_string(),
            term: term.to_string(),
            partial: result.partial,
            results_exhausted: result.results_exhausted,
            schema_registered: result.schema_registered,
            total_elapsed_ms: result.total_elapsed.as_secs_f64() * 1000.0,
            partitions: result
                .per_partition_outcomes
                .iter()
                .map(|outcome| PartitionAnswer {
                    partition: outcome.partition_id.0,
                    host: outcome.coordinate.host_id.to_string(),
                    attempts: outcome.tried_coordinates.len(),
                    elapsed_ms: outcome.elapsed_to_first_usable_result.as_secs_f64() * 1000.0,
                })
                .collect(),
            matches,
            log: result.log.entries(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PartitionRow {
    pub host: String,
    pub partition: u64,
    pub state: LifecycleState,
    pub tier: &'static str,
    pub last_indexed_sequence: i64,
}

#[derive(Debug, Serialize)]
pub struct PartitionAnswer {
    pub partition: u64,
    pub host: String,
    pub attempts: usize,
    pub elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct QuerySummary {
    pub query_id: String,
    pub term: String,
    pub partial: bool,
    pub results_exhausted: bool,
    pub schema_registered: bool,
    pub total_elapsed_ms: f64,
    pub partitions: Vec<PartitionAnswer>,
    pub matches: Vec<Activity>,
    pub log: Vec<LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cluster() -> Simulation {
        let simulation = Simulation::new(Config::default(), 2, "acme");
        simulation.populate(3, 20, 7);
        assert_eq!(simulation.tick(2).await, 0);
        simulation
    }

    #[tokio::test]
    async fn test_populated_cluster_comes_online() {
        let simulation = cluster().await;
        let table = simulation.partition_table();
        assert_eq!(table.len(), 6);
        assert!(table
            .iter()
            .all(|row| row.state == LifecycleState::Online && row.last_indexed_sequence == 19));
    }

    #[tokio::test]
    async fn test_query_returns_newest_first() {
        let simulation = cluster().await;
        let summary = simulation.query("login", 5).await.unwrap();
        assert!(!summary.partial);
        assert!(summary.matches.len() <= 5);
        assert!(summary.matches.iter().all(|a| a.has_term("login")));
        assert_eq!(summary.partitions[0].partition, 3);
    }

    #[tokio::test]
    async fn test_remove_host_forgets_replicas() {
        let simulation = cluster().await;
        assert_eq!(simulation.remove_host("host-1").await.unwrap(), 3);
        assert!(simulation.host("host-1").is_err());
        assert!(simulation.partition_table().iter().all(|row| row.host == "host-2"));

        let summary = simulation.query("login", 100).await.unwrap();
        assert!(summary.partitions.iter().all(|p| p.host == "host-2"));
    }

    #[tokio::test]
    async fn test_remove_topology_entry_keeps_partition_offline() {
        let simulation = cluster().await;
        assert!(simulation.remove_topology_entry("host-1", 2).await.unwrap());
        simulation.tick(2).await;

        let row = simulation
            .partition_table()
            .into_iter()
            .find(|row| row.host == "host-1" && row.partition == 2)
            .unwrap();
        assert_eq!(row.state, LifecycleState::Offline);
    }
}
