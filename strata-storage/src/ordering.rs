//! Partition ordering over live lifecycle snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use strata_core::{
    error::Result, traits::PartitionOrderingProvider, HostId, LifecycleState, PartitionId,
    PartitionReplicas, StorageTier, TenantId,
};

use crate::host::PartitionHost;

/// The set of hosts a query may reach
#[derive(Default)]
pub struct HostDirectory {
    hosts: DashMap<HostId, Arc<PartitionHost>>,
}

impl HostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, host: Arc<PartitionHost>) {
        self.hosts.insert(host.host_id().clone(), host);
    }

    pub fn deregister(&self, host_id: &HostId) -> Option<Arc<PartitionHost>> {
        self.hosts.remove(host_id).map(|(_, host)| host)
    }

    pub fn get(&self, host_id: &HostId) -> Option<Arc<PartitionHost>> {
        self.hosts.get(host_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Hosts ordered by id
    pub fn hosts(&self) -> Vec<Arc<PartitionHost>> {
        let mut hosts: Vec<_> = self.hosts.iter().map(|entry| Arc::clone(entry.value())).collect();
        hosts.sort_by(|a, b| a.host_id().cmp(b.host_id()));
        hosts
    }
}

/// Yields the queryable replicas of each partition, newest partition first.
///
/// Within a partition, Online replicas come before Rebuilding ones and
/// memory-tier replicas before disk-tier ones.
pub struct HostedPartitionOrdering {
    directory: Arc<HostDirectory>,
    tolerate_rebuilding: bool,
}

impl HostedPartitionOrdering {
    pub fn new(directory: Arc<HostDirectory>, tolerate_rebuilding: bool) -> Self {
        Self {
            directory,
            tolerate_rebuilding,
        }
    }
}

#[async_trait]
impl PartitionOrderingProvider for HostedPartitionOrdering {
    async fn ordered_partitions_for(&self, tenant: &TenantId, _query_key: &str) -> Result<Vec<PartitionReplicas>> {
        let mut by_partition: BTreeMap<PartitionId, Vec<_>> = BTreeMap::new();
        for host in self.directory.hosts() {
            for lifecycle in host.lifecycles_for(tenant) {
                let state = lifecycle.state();
                if !state.is_queryable(self.tolerate_rebuilding) {
                    continue;
                }
                let rank = (
                    state.lifecycle_state != LifecycleState::Online,
                    state.storage_tier != StorageTier::Memory,
                );
                by_partition
                    .entry(lifecycle.coordinate().partition_id)
                    .or_default()
                    .push((rank, lifecycle.coordinate().clone()));
            }
        }

        Ok(by_partition
            .into_iter()
            .rev()
            .map(|(partition_id, mut replicas)| {
                replicas.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.host_id.cmp(&b.1.host_id)));
                PartitionReplicas {
                    partition_id,
                    replicas: replicas.into_iter().map(|(_, coordinate)| coordinate).collect(),
                }
            })
            .collect())
    }
}
