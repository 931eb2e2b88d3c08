//! Queries against partitions hosted in-process

use std::sync::Arc;

use async_trait::async_trait;

use strata_core::{
    traits::PartitionOrderingProvider, Activity, Config, HostId, Metrics, PartitionCoordinate,
    PartitionId, PartitionReplicas, Result, TenantId,
};
use strata_query::{
    CrossPartitionOrchestrator, LimitEvaluator, LocalSolvableFactory, OrDefault, QueryRequest,
    UnionMerger,
};
use strata_storage::{HostDirectory, HostedPartitionOrdering, InMemoryCollaborators, PartitionHost};

struct Cluster {
    collaborators: Arc<InMemoryCollaborators>,
    directory: Arc<HostDirectory>,
    tenant: TenantId,
    config: Config,
}

impl Cluster {
    fn new(hosts: &[&str]) -> Self {
        let collaborators = Arc::new(InMemoryCollaborators::new());
        let directory = Arc::new(HostDirectory::new());
        let config = Config::default();
        for host in hosts {
            let host = PartitionHost::new(HostId::new(*host), &config, collaborators.clone(), Metrics::new())
                .with_manual_ticks();
            directory.register(Arc::new(host));
        }
        let tenant = TenantId::new("acme");
        collaborators.schemas().register(tenant.clone());
        Self {
            collaborators,
            directory,
            tenant,
            config,
        }
    }

    /// Host `partition` on every host and ingest `(term, payload)` activities
    fn partition(&self, partition: u64, activities: &[(&str, &str)]) {
        for host in self.directory.hosts() {
            let lifecycle = host.observe(&self.tenant, PartitionId(partition));
            self.collaborators.topology().activate(lifecycle.coordinate());
        }
        let log = self.collaborators.activity_log(&self.tenant, PartitionId(partition));
        for (term, payload) in activities {
            log.append(&[*term], *payload);
        }
    }

    async fn settle(&self) {
        for _ in 0..2 {
            for host in self.directory.hosts() {
                assert_eq!(host.tick_all().await, 0);
            }
        }
    }

    fn orchestrator(&self, ordering: Arc<dyn PartitionOrderingProvider>) -> CrossPartitionOrchestrator {
        CrossPartitionOrchestrator::new(&self.config, ordering, Metrics::new())
            .with_schema_registry(self.collaborators.schemas().clone())
    }
}

/// Ordering captured before the query runs
struct Snapshot(Vec<PartitionReplicas>);

#[async_trait]
impl PartitionOrderingProvider for Snapshot {
    async fn ordered_partitions_for(&self, _: &TenantId, _: &str) -> Result<Vec<PartitionReplicas>> {
        Ok(self.0.clone())
    }
}

fn payloads(activities: &[Activity]) -> Vec<&str> {
    activities.iter().map(|a| a.payload.as_str()).collect()
}

#[tokio::test]
async fn test_newest_matches_across_partitions() {
    let cluster = Cluster::new(&["h1", "h2"]);
    cluster.partition(1, &[("login", "p1-a"), ("login", "p1-b")]);
    cluster.partition(2, &[("login", "p2-a"), ("logout", "p2-b")]);
    cluster.partition(3, &[("login", "p3-a"), ("login", "p3-b")]);
    cluster.settle().await;

    let ordering = Arc::new(HostedPartitionOrdering::new(cluster.directory.clone(), false));
    let orchestrator = cluster.orchestrator(ordering);
    let factory = LocalSolvableFactory::new(cluster.directory.clone(), "login", 3);
    let merger = UnionMerger::by_key(|a: &Activity| a.payload.clone());

    let result = orchestrator
        .ask_and_merge(
            &QueryRequest::new(cluster.tenant.clone(), "login"),
            &factory,
            &merger,
            &LimitEvaluator::new(3),
            &OrDefault::new(Vec::new()),
        )
        .await;

    let merged = result.merged_answer.unwrap();
    assert_eq!(payloads(&merged), vec!["p3-b", "p3-a", "p2-a"]);
    let visited: Vec<u64> = result.per_partition_outcomes.iter().map(|o| o.partition_id.0).collect();
    assert_eq!(visited, vec![3, 2]);
    assert!(!result.results_exhausted);
}

#[tokio::test]
async fn test_offline_replica_falls_through_to_next() {
    let cluster = Cluster::new(&["h1", "h2"]);
    cluster.partition(1, &[("login", "p1-a")]);
    cluster.settle().await;

    let ordering = HostedPartitionOrdering::new(cluster.directory.clone(), false);
    let snapshot = ordering.ordered_partitions_for(&cluster.tenant, "login").await.unwrap();
    let first = snapshot[0].replicas[0].clone();
    assert_eq!(first.host_id, HostId::new("h1"));

    // Goes offline after the ordering was taken.
    let h1 = cluster.directory.get(&HostId::new("h1")).unwrap();
    assert!(h1.remove_topology_entry(&first).await.unwrap());

    let orchestrator = cluster.orchestrator(Arc::new(Snapshot(snapshot)));
    let factory = LocalSolvableFactory::new(cluster.directory.clone(), "login", 10);
    let merger = UnionMerger::by_key(|a: &Activity| a.sequence);

    let result = orchestrator
        .ask_and_merge(
            &QueryRequest::new(cluster.tenant.clone(), "login"),
            &factory,
            &merger,
            &LimitEvaluator::new(10),
            &OrDefault::new(Vec::new()),
        )
        .await;

    assert_eq!(payloads(&result.merged_answer.unwrap()), vec!["p1-a"]);
    let outcome = &result.per_partition_outcomes[0];
    assert_eq!(outcome.coordinate.host_id, HostId::new("h2"));
    assert_eq!(outcome.tried_coordinates.len(), 2);
    assert!(result.log.contains("failed"));
}

#[tokio::test]
async fn test_unhosted_replica_is_a_failed_attempt() {
    let cluster = Cluster::new(&["h1"]);
    cluster.partition(1, &[("login", "p1-a")]);
    cluster.settle().await;

    let ghost = PartitionCoordinate::new(cluster.tenant.clone(), PartitionId(1), HostId::new("gone"));
    let hosted = PartitionCoordinate::new(cluster.tenant.clone(), PartitionId(1), HostId::new("h1"));
    let orchestrator = cluster.orchestrator(Arc::new(Snapshot(vec![PartitionReplicas {
        partition_id: PartitionId(1),
        replicas: vec![ghost, hosted.clone()],
    }])));
    let factory = LocalSolvableFactory::new(cluster.directory.clone(), "login", 10);
    let merger = UnionMerger::by_key(|a: &Activity| a.sequence);

    let result = orchestrator
        .ask_and_merge(
            &QueryRequest::new(cluster.tenant.clone(), "login"),
            &factory,
            &merger,
            &LimitEvaluator::new(10),
            &OrDefault::new(Vec::new()),
        )
        .await;

    assert_eq!(result.per_partition_outcomes[0].coordinate, hosted);
    assert!(result.log.contains("not hosted"));
}

#[tokio::test]
async fn test_unregistered_tenant_gets_empty_answer() {
    let cluster = Cluster::new(&["h1"]);
    cluster.partition(1, &[("login", "p1-a")]);
    cluster.settle().await;

    let ordering = Arc::new(HostedPartitionOrdering::new(cluster.directory.clone(), false));
    let orchestrator = cluster.orchestrator(ordering);
    let factory = LocalSolvableFactory::new(cluster.directory.clone(), "login", 10);
    let merger = UnionMerger::by_key(|a: &Activity| a.sequence);

    let result = orchestrator
        .ask_and_merge(
            &QueryRequest::new(TenantId::new("stranger"), "login"),
            &factory,
            &merger,
            &LimitEvaluator::new(10),
            &OrDefault::new(Vec::new()),
        )
        .await;

    assert!(!result.schema_registered);
    assert_eq!(result.merged_answer, Some(Vec::new()));
}
