//! # Collaborator Traits
//!
//! Contracts the lifecycle and query layers consume. Implementations of the
//! real index engine, write-ahead log and cluster registry live elsewhere;
//! `strata-storage` ships in-memory implementations for tests and simulation.
//!
//! ## Design Philosophy
//!
//! 1. **Async-First**: anything that may touch disk or network is async
//! 2. **Error Propagation**: fallible operations return `Result`
//! 3. **Injected**: components receive `Arc<dyn Trait>` handles, never globals

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{
    Activity, ActivityBatch, PartitionCoordinate, PartitionId, PartitionReplicas, Sequence,
    StorageTier, TenantId, Timestamp,
};
use crate::Result;

/// Storage backing one partition's index across tiers
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// Open (allocating if needed) a read view over `tier`
    async fn open_for_tier(&self, tier: StorageTier) -> Result<Arc<dyn IndexView>>;

    /// Index activities into `tier`
    async fn append(&self, tier: StorageTier, activities: &[Activity]) -> Result<()>;

    /// Copy the contents of `from` into `to`; `from` stays readable
    async fn migrate(&self, from: StorageTier, to: StorageTier) -> Result<()>;

    /// Free the resources of a tier no reader references any more
    async fn release(&self, tier: StorageTier) -> Result<()>;

    /// Drop all indexed content ahead of a forced rebuild, so the next
    /// `open_for_tier` starts empty.
    ///
    /// Views handed out before the reset must stay readable until dropped:
    /// queries may still hold them. Their storage is reclaimed through
    /// `release` once the last reader is gone.
    async fn reset(&self) -> Result<()>;

    /// Close everything; the storage is not reused afterwards
    async fn close(&self) -> Result<()>;

    /// Approximate size of the index in bytes
    fn size_estimate(&self) -> u64;
}

/// Read-only view of one tier of a partition's index
pub trait IndexView: Send + Sync {
    fn tier(&self) -> StorageTier;

    /// Number of indexed activities
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Activities carrying `term`, newest first, at most `limit`
    fn find(&self, term: &str, limit: usize) -> Vec<Activity>;
}

/// The activity write-ahead log of one partition
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Read up to `batch_size` activities with sequence strictly greater than `sequence`
    async fn read_since(&self, sequence: Sequence, batch_size: usize) -> Result<ActivityBatch>;

    /// Highest sequence currently in the log
    async fn latest_sequence(&self) -> Result<Sequence>;
}

/// Cluster topology as seen by this host
#[async_trait]
pub trait TopologyRegistry: Send + Sync {
    async fn is_active(&self, coordinate: &PartitionCoordinate) -> Result<bool>;

    async fn last_ingress_timestamp(&self, coordinate: &PartitionCoordinate) -> Result<Option<Timestamp>>;

    /// Whether this replica's content is stale relative to its replica set
    async fn is_replica_stale(&self, coordinate: &PartitionCoordinate) -> Result<bool>;
}

/// Tenant schema lookup
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn has_schema(&self, tenant: &TenantId) -> Result<bool>;
}

/// Chooses and orders the partitions a query should visit
#[async_trait]
pub trait PartitionOrderingProvider: Send + Sync {
    async fn ordered_partitions_for(
        &self,
        tenant: &TenantId,
        query_key: &str,
    ) -> Result<Vec<PartitionReplicas>>;
}

/// Per-partition latency knowledge used to size escalation intervals
pub trait LatencyHistory: Send + Sync {
    fn suggest_timeout(&self, tenant: &TenantId, partition: PartitionId, query_key: &str) -> Option<Duration>;

    fn record(&self, tenant: &TenantId, partition: PartitionId, query_key: &str, elapsed: Duration);
}

/// Latency history that never suggests anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLatencyHistory;

impl LatencyHistory for NoLatencyHistory {
    fn suggest_timeout(&self, _: &TenantId, _: PartitionId, _: &str) -> Option<Duration> {
        None
    }

    fn record(&self, _: &TenantId, _: PartitionId, _: &str, _: Duration) {}
}
