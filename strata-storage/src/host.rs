//! # Partition Host
//!
//! Registry of the partitions hosted on one machine, keyed by coordinate.
//! Lifecycles are created Offline when a coordinate is first observed and
//! leave the registry only through explicit invalidation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use strata_core::{
    config::{Config, LifecycleConfig, MergeBudgetConfig},
    error::{Error, Result},
    metrics::Metrics,
    HostId, LifecycleState, PartitionCoordinate, PartitionId, PartitionRuntimeState, StorageTier,
    TenantId,
};

use crate::lifecycle::{PartitionCollaborators, PartitionLifecycle};
use crate::merge_budget::MergeBudgets;

/// Supplies the collaborators for a newly observed partition
pub trait CollaboratorFactory: Send + Sync {
    fn collaborators(&self, coordinate: &PartitionCoordinate) -> PartitionCollaborators;
}

pub struct PartitionHost {
    host_id: HostId,
    lifecycle_config: LifecycleConfig,
    merge_config: MergeBudgetConfig,
    partitions: DashMap<PartitionCoordinate, Arc<PartitionLifecycle>>,
    factory: Arc<dyn CollaboratorFactory>,
    metrics: Metrics,
    autostart: bool,
}

impl PartitionHost {
    pub fn new(host_id: HostId, config: &Config, factory: Arc<dyn CollaboratorFactory>, metrics: Metrics) -> Self {
        Self {
            host_id,
            lifecycle_config: config.lifecycle.clone(),
            merge_config: config.merge_budget.clone(),
            partitions: DashMap::new(),
            factory,
            metrics,
            autostart: true,
        }
    }

    /// Do not schedule maintenance tasks; the caller drives ticks itself
    pub fn with_manual_ticks(mut self) -> Self {
        self.autostart = false;
        self
    }

    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    pub fn tolerates_rebuilding_reads(&self) -> bool {
        self.lifecycle_config.tolerate_rebuilding_reads
    }

    /// Lifecycle for (tenant, partition) on this host, created on first observation
    pub fn observe(&self, tenant: &TenantId, partition: PartitionId) -> Arc<PartitionLifecycle> {
        let coordinate = PartitionCoordinate::new(tenant.clone(), partition, self.host_id.clone());
        if let Some(existing) = self.partitions.get(&coordinate) {
            return Arc::clone(existing.value());
        }

        let lifecycle = Arc::clone(
            self.partitions
                .entry(coordinate.clone())
                .or_insert_with(|| {
                    PartitionLifecycle::new(
                        coordinate.clone(),
                        self.lifecycle_config.clone(),
                        self.factory.collaborators(&coordinate),
                        MergeBudgets::from_config(&self.merge_config),
                        self.metrics.clone(),
                    )
                })
                .value(),
        );
        if self.autostart {
            lifecycle.start();
        }
        lifecycle
    }

    pub fn get(&self, coordinate: &PartitionCoordinate) -> Option<Arc<PartitionLifecycle>> {
        self.partitions.get(coordinate).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lifecycles(&self) -> Vec<Arc<PartitionLifecycle>> {
        self.partitions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn lifecycles_for(&self, tenant: &TenantId) -> Vec<Arc<PartitionLifecycle>> {
        self.partitions
            .iter()
            .filter(|entry| &entry.key().tenant_id == tenant)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of every hosted partition, ordered by coordinate
    pub fn states(&self) -> Vec<(PartitionCoordinate, PartitionRuntimeState)> {
        let mut states: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Run one bootstrap, rebuild and sip-migrate tick on every partition.
    /// Failures are logged and do not stop the sweep.
    pub async fn tick_all(&self) -> usize {
        let mut failures = 0;
        for lifecycle in self.lifecycles() {
            let ticks = [
                lifecycle.bootstrap_tick().await,
                lifecycle.rebuild_tick().await,
                lifecycle.sip_migrate_tick().await,
            ];
            for outcome in ticks {
                if let Err(e) = outcome {
                    failures += 1;
                    warn!(partition = %lifecycle.coordinate(), code = e.error_code(), "Tick failed: {}", e);
                }
            }
        }
        failures
    }

    fn hosted(&self, coordinate: &PartitionCoordinate) -> Result<Arc<PartitionLifecycle>> {
        self.get(coordinate).ok_or_else(|| Error::PartitionUnavailable {
            coordinate: coordinate.clone(),
            state: LifecycleState::Offline,
        })
    }

    pub async fn force_tier(&self, coordinate: &PartitionCoordinate, tier: StorageTier) -> Result<bool> {
        self.hosted(coordinate)?.force_tier(tier).await
    }

    /// Take the partition offline without forgetting it. The owner of the
    /// topology registry removes the entry so bootstrap does not revive it.
    pub async fn remove_topology_entry(&self, coordinate: &PartitionCoordinate) -> Result<bool> {
        let lifecycle = self.hosted(coordinate)?;
        let changed = lifecycle.take_offline().await?;
        info!(partition = %coordinate, changed, "Removed topology entry");
        Ok(changed)
    }

    /// Destroy one partition and forget it
    pub async fn invalidate(&self, coordinate: &PartitionCoordinate) -> Result<bool> {
        let Some((_, lifecycle)) = self.partitions.remove(coordinate) else {
            return Ok(false);
        };
        lifecycle.destroy().await?;
        Ok(true)
    }

    /// Destroy every hosted partition; the host is empty afterwards
    pub async fn remove_host(&self) -> Result<usize> {
        let coordinates: Vec<_> = self.partitions.iter().map(|entry| entry.key().clone()).collect();
        let mut destroyed = 0;
        for coordinate in coordinates {
            if self.invalidate(&coordinate).await? {
                destroyed += 1;
            }
        }
        info!(host = %self.host_id, destroyed, "Removed host");
        Ok(destroyed)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}
