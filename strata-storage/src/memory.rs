//! # In-Memory Collaborators
//!
//! Reference implementations of the collaborator traits, used by the
//! integration tests and the CLI simulator.
//!
//! - [`InMemoryIndexStorage`]: one skip-list index per tier with a term postings list
//! - [`InMemoryActivityLog`]: sequence-ordered activity WAL
//! - [`StaticTopology`]: settable per-coordinate activity, ingress and staleness
//! - [`StaticSchemaRegistry`]: set of tenants with a registered schema
//! - [`InMemoryCollaborators`]: factory wiring the above per coordinate

use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use strata_core::{
    error::{Error, Result},
    traits::{ActivityLog, IndexStorage, IndexView, SchemaRegistry, TopologyRegistry},
    Activity, ActivityBatch, HostId, PartitionCoordinate, PartitionId, Sequence, StorageTier,
    TenantId, Timestamp, NO_SEQUENCE,
};

use crate::host::CollaboratorFactory;
use crate::lifecycle::PartitionCollaborators;

/// One tier's index: activities by sequence plus a (term, sequence) postings list
struct TierIndex {
    tier: StorageTier,
    activities: SkipMap<Sequence, Activity>,
    postings: SkipMap<(String, Sequence), ()>,
    bytes: AtomicU64,
}

impl TierIndex {
    fn new(tier: StorageTier) -> Self {
        Self {
            tier,
            activities: SkipMap::new(),
            postings: SkipMap::new(),
            bytes: AtomicU64::new(0),
        }
    }

    fn insert(&self, activity: &Activity) {
        if self.activities.contains_key(&activity.sequence) {
            return;
        }
        for term in &activity.terms {
            self.postings.insert((term.clone(), activity.sequence), ());
        }
        self.bytes
            .fetch_add(activity.estimated_size() as u64, Ordering::Relaxed);
        self.activities.insert(activity.sequence, activity.clone());
    }

    fn size(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl IndexView for TierIndex {
    fn tier(&self) -> StorageTier {
        self.tier
    }

    fn len(&self) -> usize {
        self.activities.len()
    }

    fn find(&self, term: &str, limit: usize) -> Vec<Activity> {
        let low = (term.to_string(), Sequence::MIN);
        let high = (term.to_string(), Sequence::MAX);
        self.postings
            .range(low..=high)
            .rev()
            .filter_map(|posting| {
                self.activities
                    .get(&posting.key().1)
                    .map(|entry| entry.value().clone())
            })
            .take(limit)
            .collect()
    }
}

/// Tiered index storage held entirely in memory
pub struct InMemoryIndexStorage {
    tiers: DashMap<StorageTier, Arc<TierIndex>>,
    migration_delay: Option<Duration>,
    failing_opens: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryIndexStorage {
    pub fn new() -> Self {
        Self {
            tiers: DashMap::new(),
            migration_delay: None,
            failing_opens: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Make every migration copy take at least `delay`
    pub fn with_migration_delay(mut self, delay: Duration) -> Self {
        self.migration_delay = Some(delay);
        self
    }

    /// Fail the next `count` calls to `open_for_tier`
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tiers currently holding storage
    pub fn allocated_tiers(&self) -> Vec<StorageTier> {
        let mut tiers: Vec<_> = self.tiers.iter().map(|entry| *entry.key()).collect();
        tiers.sort_by_key(|tier| tier.as_str());
        tiers
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::IndexStorage {
                message: "storage is closed".into(),
            });
        }
        Ok(())
    }

    fn tier(&self, tier: StorageTier) -> Arc<TierIndex> {
        Arc::clone(
            self.tiers
                .entry(tier)
                .or_insert_with(|| Arc::new(TierIndex::new(tier)))
                .value(),
        )
    }
}

impl Default for InMemoryIndexStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStorage for InMemoryIndexStorage {
    async fn open_for_tier(&self, tier: StorageTier) -> Result<Arc<dyn IndexView>> {
        self.ensure_open()?;
        let injected = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::IndexStorage {
                message: format!("failed to open {} tier", tier),
            });
        }
        let index: Arc<dyn IndexView> = self.tier(tier);
        Ok(index)
    }

    async fn append(&self, tier: StorageTier, activities: &[Activity]) -> Result<()> {
        self.ensure_open()?;
        let index = self.tier(tier);
        for activity in activities {
            index.insert(activity);
        }
        Ok(())
    }

    async fn migrate(&self, from: StorageTier, to: StorageTier) -> Result<()> {
        self.ensure_open()?;
        if let Some(delay) = self.migration_delay {
            tokio::time::sleep(delay).await;
        }

        let source = self.tier(from);
        let target = Arc::new(TierIndex::new(to));
        for entry in source.activities.iter() {
            target.insert(entry.value());
        }
        debug!(from = %from, to = %to, activities = target.len(), "Copied tier");
        self.tiers.insert(to, target);
        Ok(())
    }

    async fn release(&self, tier: StorageTier) -> Result<()> {
        self.tiers.remove(&tier);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.ensure_open()?;
        self.tiers.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.tiers.clear();
        Ok(())
    }

    fn size_estimate(&self) -> u64 {
        self.tiers
            .iter()
            .map(|entry| entry.value().size())
            .max()
            .unwrap_or(0)
    }
}

/// Sequence-ordered activity log; sequences start at 0
pub struct InMemoryActivityLog {
    entries: SkipMap<Sequence, Activity>,
    next_sequence: AtomicI64,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self {
            entries: SkipMap::new(),
            next_sequence: AtomicI64::new(0),
        }
    }

    /// Append one activity, returning its sequence
    pub fn append(&self, terms: &[&str], payload: impl Into<String>) -> Sequence {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let terms = terms.iter().map(|t| t.to_string()).collect();
        self.entries
            .insert(sequence, Activity::new(sequence, terms, payload));
        sequence
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn read_since(&self, sequence: Sequence, batch_size: usize) -> Result<ActivityBatch> {
        let activities: Vec<Activity> = self
            .entries
            .range((Bound::Excluded(sequence), Bound::Unbounded))
            .take(batch_size)
            .map(|entry| entry.value().clone())
            .collect();

        let latest = self.latest_sequence().await?;
        let end_of_stream = activities
            .last()
            .map_or(true, |last| last.sequence >= latest);
        Ok(ActivityBatch {
            activities,
            end_of_stream,
        })
    }

    async fn latest_sequence(&self) -> Result<Sequence> {
        Ok(self
            .entries
            .back()
            .map(|entry| *entry.key())
            .unwrap_or(NO_SEQUENCE))
    }
}

#[derive(Debug, Clone, Default)]
struct TopologyEntry {
    active: bool,
    last_ingress: Option<Timestamp>,
    stale: bool,
}

/// Topology registry whose answers are set directly
#[derive(Default)]
pub struct StaticTopology {
    entries: RwLock<HashMap<PartitionCoordinate, TopologyEntry>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark active with a fresh ingress timestamp
    pub fn activate(&self, coordinate: &PartitionCoordinate) {
        let mut entries = self.entries.write();
        let entry = entries.entry(coordinate.clone()).or_default();
        entry.active = true;
        entry.last_ingress = Some(Utc::now());
    }

    pub fn set_active(&self, coordinate: &PartitionCoordinate, active: bool) {
        self.entries
            .write()
            .entry(coordinate.clone())
            .or_default()
            .active = active;
    }

    pub fn set_ingress(&self, coordinate: &PartitionCoordinate, ingress: Option<Timestamp>) {
        self.entries
            .write()
            .entry(coordinate.clone())
            .or_default()
            .last_ingress = ingress;
    }

    pub fn set_stale(&self, coordinate: &PartitionCoordinate, stale: bool) {
        self.entries
            .write()
            .entry(coordinate.clone())
            .or_default()
            .stale = stale;
    }

    pub fn remove(&self, coordinate: &PartitionCoordinate) -> bool {
        self.entries.write().remove(coordinate).is_some()
    }

    /// Drop every entry of `host`, returning how many were removed
    pub fn remove_host(&self, host: &HostId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|coordinate, _| &coordinate.host_id != host);
        before - entries.len()
    }
}

#[async_trait]
impl TopologyRegistry for StaticTopology {
    async fn is_active(&self, coordinate: &PartitionCoordinate) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .get(coordinate)
            .map_or(false, |entry| entry.active))
    }

    async fn last_ingress_timestamp(&self, coordinate: &PartitionCoordinate) -> Result<Option<Timestamp>> {
        Ok(self
            .entries
            .read()
            .get(coordinate)
            .and_then(|entry| entry.last_ingress))
    }

    async fn is_replica_stale(&self, coordinate: &PartitionCoordinate) -> Result<bool> {
        Ok(self
            .entries
            .read()
            .get(coordinate)
            .map_or(false, |entry| entry.stale))
    }
}

#[derive(Default)]
pub struct StaticSchemaRegistry {
    tenants: RwLock<HashSet<TenantId>>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant: TenantId) {
        self.tenants.write().insert(tenant);
    }

    pub fn unregister(&self, tenant: &TenantId) -> bool {
        self.tenants.write().remove(tenant)
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn has_schema(&self, tenant: &TenantId) -> Result<bool> {
        Ok(self.tenants.read().contains(tenant))
    }
}

/// Wires in-memory collaborators per coordinate.
///
/// Every replica gets its own index storage; replicas of the same
/// (tenant, partition) share one activity log.
pub struct InMemoryCollaborators {
    topology: Arc<StaticTopology>,
    schemas: Arc<StaticSchemaRegistry>,
    logs: DashMap<(TenantId, PartitionId), Arc<InMemoryActivityLog>>,
    storages: DashMap<PartitionCoordinate, Arc<InMemoryIndexStorage>>,
    migration_delay: Option<Duration>,
}

impl InMemoryCollaborators {
    pub fn new() -> Self {
        Self {
            topology: Arc::new(StaticTopology::new()),
            schemas: Arc::new(StaticSchemaRegistry::new()),
            logs: DashMap::new(),
            storages: DashMap::new(),
            migration_delay: None,
        }
    }

    pub fn with_migration_delay(mut self, delay: Duration) -> Self {
        self.migration_delay = Some(delay);
        self
    }

    pub fn topology(&self) -> &Arc<StaticTopology> {
        &self.topology
    }

    pub fn schemas(&self) -> &Arc<StaticSchemaRegistry> {
        &self.schemas
    }

    /// The shared log of (tenant, partition), created on first use
    pub fn activity_log(&self, tenant: &TenantId, partition: PartitionId) -> Arc<InMemoryActivityLog> {
        Arc::clone(
            self.logs
                .entry((tenant.clone(), partition))
                .or_insert_with(|| Arc::new(InMemoryActivityLog::new()))
                .value(),
        )
    }

    /// Storage handed to the replica at `coordinate`, if it was ever created
    pub fn storage(&self, coordinate: &PartitionCoordinate) -> Option<Arc<InMemoryIndexStorage>> {
        self.storages
            .get(coordinate)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for InMemoryCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl CollaboratorFactory for InMemoryCollaborators {
    fn collaborators(&self, coordinate: &PartitionCoordinate) -> PartitionCollaborators {
        let mut storage = InMemoryIndexStorage::new();
        if let Some(delay) = self.migration_delay {
            storage = storage.with_migration_delay(delay);
        }
        let storage = Arc::new(storage);
        self.storages
            .insert(coordinate.clone(), Arc::clone(&storage));

        PartitionCollaborators {
            storage,
            activity_log: self.activity_log(&coordinate.tenant_id, coordinate.partition_id),
            topology: Arc::clone(&self.topology) as Arc<dyn TopologyRegistry>,
            schemas: Arc::clone(&self.schemas) as Arc<dyn SchemaRegistry>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_is_newest_first() {
        let storage = InMemoryIndexStorage::new();
        let activities: Vec<_> = (0..5)
            .map(|seq| {
                let terms = if seq % 2 == 0 { vec!["even".to_string()] } else { vec!["odd".to_string()] };
                Activity::new(seq, terms, format!("a{}", seq))
            })
            .collect();
        storage.append(StorageTier::Memory, &activities).await.unwrap();

        let view = storage.open_for_tier(StorageTier::Memory).await.unwrap();
        let found: Vec<_> = view.find("even", 10).into_iter().map(|a| a.sequence).collect();
        assert_eq!(found, vec![4, 2, 0]);
        assert_eq!(view.find("even", 2).len(), 2);
        assert!(view.find("missing", 10).is_empty());
    }

    #[tokio::test]
    async fn test_migrate_copies_and_keeps_source() {
        let storage = InMemoryIndexStorage::new();
        storage
            .append(StorageTier::Memory, &[Activity::new(0, vec!["x".into()], "p")])
            .await
            .unwrap();
        storage.migrate(StorageTier::Memory, StorageTier::Disk).await.unwrap();

        let disk = storage.open_for_tier(StorageTier::Disk).await.unwrap();
        assert_eq!(disk.len(), 1);
        assert_eq!(storage.allocated_tiers(), vec![StorageTier::Disk, StorageTier::Memory]);

        storage.release(StorageTier::Memory).await.unwrap();
        assert_eq!(storage.allocated_tiers(), vec![StorageTier::Disk]);
    }

    #[tokio::test]
    async fn test_reset_keeps_open_views_readable() {
        let storage = InMemoryIndexStorage::new();
        storage
            .append(StorageTier::Memory, &[Activity::new(0, vec!["x".into()], "p")])
            .await
            .unwrap();
        let before = storage.open_for_tier(StorageTier::Memory).await.unwrap();

        storage.reset().await.unwrap();
        assert_eq!(before.find("x", 10).len(), 1);

        let after = storage.open_for_tier(StorageTier::Memory).await.unwrap();
        assert!(after.is_empty());
        assert_eq!(before.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_open_failure() {
        let storage = InMemoryIndexStorage::new();
        storage.fail_next_opens(1);
        assert!(storage.open_for_tier(StorageTier::Memory).await.is_err());
        assert!(storage.open_for_tier(StorageTier::Memory).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_writes() {
        let storage = InMemoryIndexStorage::new();
        storage.close().await.unwrap();
        let err = storage.append(StorageTier::Memory, &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "INDEX_STORAGE_ERROR");
    }

    #[tokio::test]
    async fn test_log_reads_in_batches() {
        let log = InMemoryActivityLog::new();
        for i in 0..5 {
            log.append(&["t"], format!("p{}", i));
        }
        assert_eq!(log.latest_sequence().await.unwrap(), 4);

        let first = log.read_since(NO_SEQUENCE, 3).await.unwrap();
        assert_eq!(first.activities.len(), 3);
        assert!(!first.end_of_stream);

        let rest = log.read_since(2, 3).await.unwrap();
        assert_eq!(rest.activities.iter().map(|a| a.sequence).collect::<Vec<_>>(), vec![3, 4]);
        assert!(rest.end_of_stream);
    }

    #[tokio::test]
    async fn test_topology_defaults_to_inactive() {
        let topology = StaticTopology::new();
        let coordinate = PartitionCoordinate::new(TenantId::new("t"), PartitionId(1), HostId::new("h"));
        assert!(!topology.is_active(&coordinate).await.unwrap());

        topology.activate(&coordinate);
        assert!(topology.is_active(&coordinate).await.unwrap());
        assert!(topology.last_ingress_timestamp(&coordinate).await.unwrap().is_some());

        assert_eq!(topology.remove_host(&HostId::new("h")), 1);
        assert!(!topology.is_active(&coordinate).await.unwrap());
    }
}
