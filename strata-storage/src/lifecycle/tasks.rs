//! Maintenance ticks: bootstrap-check, rebuild and sip-migrate.
//!
//! Each tick is safe to call directly (tests drive them one at a time) and is
//! what the scheduled loops run. A tick whose gate is busy is skipped, and any
//! tick that would change storage structure while another one is doing so
//! backs off instead of waiting.

use chrono::Utc;
use tracing::{debug, info, warn};

use strata_core::{
    error::{Error, Result},
    metrics::Timer,
    LifecycleState, Sequence, StorageTier, NO_SEQUENCE,
};

use super::PartitionLifecycle;
use crate::merge_budget::{MergeChits, MergeClass};
use crate::scheduler::TaskGate;

/// What a single maintenance tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Previous run of this task, or conflicting maintenance, still executing
    Skipped,
    /// Nothing to do, or the partition is not ready yet
    Idle,
    /// Teardown postponed until a rebuild or in-flight maintenance finishes
    Deferred,
    /// Merge budget exhausted; the next tick retries
    Throttled,
    Transitioned {
        from: LifecycleState,
        to: LifecycleState,
    },
    /// Activities indexed without a state change
    Progressed { indexed: usize },
    Migrated { from: StorageTier, to: StorageTier },
}

struct DrainProgress {
    indexed: usize,
    reached_target: bool,
}

impl PartitionLifecycle {
    fn skipped(&self, gate: &TaskGate) -> TickOutcome {
        self.metrics.record_tick_skipped();
        debug!(partition = %self.coordinate, task = gate.name(), "Previous run still executing, skipping tick");
        TickOutcome::Skipped
    }

    /// Active in topology and ingress fresher than the staleness threshold
    async fn topology_active(&self) -> Result<bool> {
        let topology = &self.collaborators.topology;
        if !topology.is_active(&self.coordinate).await? {
            return Ok(false);
        }
        match topology.last_ingress_timestamp(&self.coordinate).await? {
            Some(ingress) => match (Utc::now() - ingress).to_std() {
                Ok(age) => Ok(age <= self.config.topology_staleness),
                // Ingress stamped in the future: clock skew, treat as fresh.
                Err(_) => Ok(true),
            },
            None => Ok(true),
        }
    }

    /// Bootstrap-check: bring partitions up, tear them down, force rebuilds.
    pub async fn bootstrap_tick(&self) -> Result<TickOutcome> {
        let Some(_running) = self.bootstrap_gate.try_enter() else {
            return Ok(self.skipped(&self.bootstrap_gate));
        };

        let state = self.state();
        if state.destroyed {
            return Ok(TickOutcome::Idle);
        }

        let active = self.topology_active().await?;
        match (state.lifecycle_state, active) {
            (LifecycleState::Offline, false) => Ok(TickOutcome::Idle),
            (LifecycleState::Offline, true) => self.begin_bootstrap().await,
            (LifecycleState::Bootstrap, true) => self.finish_bootstrap().await,
            (LifecycleState::Rebuilding, true) => Ok(TickOutcome::Idle),
            (LifecycleState::Online, true) => {
                if self.collaborators.topology.is_replica_stale(&self.coordinate).await? {
                    self.force_rebuild(LifecycleState::Online).await
                } else {
                    Ok(TickOutcome::Idle)
                }
            }
            (LifecycleState::Obsolete, true) => self.force_rebuild(LifecycleState::Obsolete).await,
            (LifecycleState::Rebuilding, false) => {
                info!(
                    partition = %self.coordinate,
                    "Partition inactive, deferring teardown until rebuild completes"
                );
                Ok(TickOutcome::Deferred)
            }
            (current, false) => self.teardown(current).await,
        }
    }

    async fn begin_bootstrap(&self) -> Result<TickOutcome> {
        let tenant = &self.coordinate.tenant_id;
        if !self.collaborators.schemas.has_schema(tenant).await? {
            let unavailable = Error::SchemaUnavailable { tenant: tenant.clone() };
            info!(
                partition = %self.coordinate,
                code = unavailable.error_code(),
                "{}, staying offline",
                unavailable
            );
            return Ok(TickOutcome::Idle);
        }
        if !self.transition(LifecycleState::Offline, LifecycleState::Bootstrap)? {
            return Ok(TickOutcome::Idle);
        }
        match self.finish_bootstrap().await? {
            TickOutcome::Skipped => Ok(TickOutcome::Transitioned {
                from: LifecycleState::Offline,
                to: LifecycleState::Bootstrap,
            }),
            outcome => Ok(outcome),
        }
    }

    /// Housekeeping: allocate the memory tier and position the log cursor.
    /// On failure the partition stays in Bootstrap and the next tick retries.
    async fn finish_bootstrap(&self) -> Result<TickOutcome> {
        let Ok(_maintenance) = self.maintenance.try_lock() else {
            return Ok(TickOutcome::Skipped);
        };

        let view = self.collaborators.storage.open_for_tier(StorageTier::Memory).await?;
        let latest = self.collaborators.activity_log.latest_sequence().await?;

        self.tiers.install(view);
        self.rebuild_target.lock().take();
        let moved = self.transition_with(LifecycleState::Bootstrap, LifecycleState::Rebuilding, |s| {
            s.storage_tier = StorageTier::Memory;
            s.last_indexed_sequence = NO_SEQUENCE;
        })?;
        if !moved {
            return Ok(TickOutcome::Idle);
        }

        debug!(partition = %self.coordinate, latest, "Bootstrap housekeeping complete");
        Ok(TickOutcome::Transitioned {
            from: LifecycleState::Bootstrap,
            to: LifecycleState::Rebuilding,
        })
    }

    /// Online -> Obsolete -> Rebuilding, discarding possibly stale content
    async fn force_rebuild(&self, from: LifecycleState) -> Result<TickOutcome> {
        let Ok(_maintenance) = self.maintenance.try_lock() else {
            return Ok(TickOutcome::Deferred);
        };

        if from == LifecycleState::Online {
            if !self.transition(LifecycleState::Online, LifecycleState::Obsolete)? {
                return Ok(TickOutcome::Idle);
            }
            warn!(partition = %self.coordinate, "Replica content is stale, forcing rebuild");
        }

        self.tiers.clear();
        self.collaborators.storage.reset().await?;
        let view = self.collaborators.storage.open_for_tier(StorageTier::Memory).await?;
        self.tiers.install(view);
        self.rebuild_target.lock().take();

        let moved = self.transition_with(LifecycleState::Obsolete, LifecycleState::Rebuilding, |s| {
            s.storage_tier = StorageTier::Memory;
            s.last_indexed_sequence = NO_SEQUENCE;
        })?;
        self.release_drained().await?;

        Ok(if moved {
            TickOutcome::Transitioned {
                from: LifecycleState::Obsolete,
                to: LifecycleState::Rebuilding,
            }
        } else {
            TickOutcome::Idle
        })
    }

    async fn teardown(&self, current: LifecycleState) -> Result<TickOutcome> {
        let Ok(_maintenance) = self.maintenance.try_lock() else {
            info!(
                partition = %self.coordinate,
                state = %current,
                "Partition inactive, deferring teardown until in-flight maintenance finishes"
            );
            return Ok(TickOutcome::Deferred);
        };
        self.go_offline(current).await
    }

    /// Caller holds the maintenance lock.
    pub(super) async fn go_offline(&self, from: LifecycleState) -> Result<TickOutcome> {
        let moved = self.transition_with(from, LifecycleState::Offline, |s| {
            s.storage_tier = StorageTier::Memory;
            s.last_indexed_sequence = NO_SEQUENCE;
        })?;
        if !moved {
            return Ok(TickOutcome::Idle);
        }

        self.tiers.clear();
        self.rebuild_target.lock().take();
        self.collaborators.storage.reset().await?;
        self.release_drained().await?;
        Ok(TickOutcome::Transitioned {
            from,
            to: LifecycleState::Offline,
        })
    }

    /// Rebuild: drain the activity log into the current tier. While
    /// Rebuilding, reaching the sequence observed at pass start brings the
    /// partition Online; while Online, it keeps tailing new writes.
    pub async fn rebuild_tick(&self) -> Result<TickOutcome> {
        let Some(_running) = self.rebuild_gate.try_enter() else {
            return Ok(self.skipped(&self.rebuild_gate));
        };
        if !matches!(
            self.state().lifecycle_state,
            LifecycleState::Rebuilding | LifecycleState::Online
        ) {
            return Ok(TickOutcome::Idle);
        }
        let Ok(_maintenance) = self.maintenance.try_lock() else {
            return Ok(self.skipped(&self.rebuild_gate));
        };

        let state = self.state();
        let phase = state.lifecycle_state;
        if state.destroyed || !matches!(phase, LifecycleState::Rebuilding | LifecycleState::Online) {
            return Ok(TickOutcome::Idle);
        }

        let latest = self.collaborators.activity_log.latest_sequence().await?;
        let target = if phase == LifecycleState::Rebuilding {
            *self.rebuild_target.lock().get_or_insert(latest)
        } else {
            latest
        };

        let timer = Timer::new("rebuild_pass");
        let progress = self.drain_until(target, state.storage_tier).await?;
        let elapsed = timer.stop();

        if phase == LifecycleState::Rebuilding && progress.reached_target {
            self.rebuild_target.lock().take();
            if self.transition(LifecycleState::Rebuilding, LifecycleState::Online)? {
                info!(
                    partition = %self.coordinate,
                    indexed = progress.indexed,
                    target,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Rebuild complete"
                );
                return Ok(TickOutcome::Transitioned {
                    from: LifecycleState::Rebuilding,
                    to: LifecycleState::Online,
                });
            }
        }

        Ok(if progress.indexed > 0 {
            TickOutcome::Progressed {
                indexed: progress.indexed,
            }
        } else {
            TickOutcome::Idle
        })
    }

    /// Caller holds the maintenance lock.
    async fn drain_until(&self, target: Sequence, tier: StorageTier) -> Result<DrainProgress> {
        let mut cursor = self.state().last_indexed_sequence;
        let mut batch_size = self.config.rebuild_batch_size.max(1);
        let mut indexed = 0usize;

        while cursor < target {
            if self.is_destroyed() {
                return Ok(DrainProgress {
                    indexed,
                    reached_target: false,
                });
            }

            let wanted = batch_size.min(usize::try_from(target - cursor).unwrap_or(usize::MAX));
            let Some((chits, size)) = self.borrow_batch(wanted) else {
                debug!(partition = %self.coordinate, cursor, "Merge budget exhausted, resuming next tick");
                return Ok(DrainProgress {
                    indexed,
                    reached_target: false,
                });
            };
            batch_size = size;

            let batch = self.collaborators.activity_log.read_since(cursor, size).await?;
            let Some(last) = batch.activities.last().map(|a| a.sequence) else {
                break;
            };
            self.collaborators.storage.append(tier, &batch.activities).await?;
            drop(chits);

            cursor = last;
            self.state.write().last_indexed_sequence = cursor;
            indexed += batch.activities.len();
            self.metrics.record_indexed(batch.activities.len() as u64);

            if batch.end_of_stream {
                break;
            }
        }

        Ok(DrainProgress {
            indexed,
            reached_target: true,
        })
    }

    /// Borrow transient chits for a batch, halving the batch until it fits
    fn borrow_batch(&self, wanted: usize) -> Option<(MergeChits, usize)> {
        let pool = self.budgets.pool(MergeClass::Transient);
        let mut size = wanted.max(1);
        loop {
            if let Some(chits) = pool.borrow(size as i64) {
                return Some((chits, size));
            }
            self.metrics.record_merge_budget_denial();
            if size == 1 {
                return None;
            }
            size = (size / 2).max(1);
        }
    }

    /// Borrow persistent chits for copying the current tier, one per indexed
    /// activity. A copy larger than the pool borrows the whole cap.
    fn borrow_migration(&self) -> Option<MergeChits> {
        let pool = self.budgets.pool(MergeClass::Persistent);
        let activities = self.tiers.current_len().unwrap_or(0) as i64;
        let chits = pool.borrow(activities.clamp(1, pool.cap().max(1)));
        if chits.is_none() {
            self.metrics.record_merge_budget_denial();
        }
        chits
    }

    /// Sip-migrate: release drained tiers, and move a grown memory index to disk.
    pub async fn sip_migrate_tick(&self) -> Result<TickOutcome> {
        let Some(_running) = self.sip_migrate_gate.try_enter() else {
            return Ok(self.skipped(&self.sip_migrate_gate));
        };
        let Ok(_maintenance) = self.maintenance.try_lock() else {
            return Ok(self.skipped(&self.sip_migrate_gate));
        };

        self.release_drained().await?;

        let state = self.state();
        if state.destroyed
            || state.lifecycle_state != LifecycleState::Online
            || state.storage_tier != StorageTier::Memory
        {
            return Ok(TickOutcome::Idle);
        }

        let size = self.collaborators.storage.size_estimate();
        if size < self.config.migration_threshold_bytes {
            return Ok(TickOutcome::Idle);
        }

        debug!(
            partition = %self.coordinate,
            size,
            threshold = self.config.migration_threshold_bytes,
            "Memory index past migration threshold"
        );
        self.migrate_to(StorageTier::Disk).await
    }

    /// Copy into `to`, then swap the current-tier pointer. Readers keep the
    /// old generation until they drop their handles. Caller holds the
    /// maintenance lock.
    pub(super) async fn migrate_to(&self, to: StorageTier) -> Result<TickOutcome> {
        let state = self.state();
        if state.destroyed || state.lifecycle_state != LifecycleState::Online {
            return Ok(TickOutcome::Idle);
        }
        let from = state.storage_tier;
        if from == to {
            return Ok(TickOutcome::Idle);
        }

        let Some(_chits) = self.borrow_migration() else {
            debug!(partition = %self.coordinate, from = %from, to = %to, "Persistent merge budget exhausted, deferring migration");
            return Ok(TickOutcome::Throttled);
        };

        let timer = Timer::new("tier_migration");
        self.collaborators.storage.migrate(from, to).await?;
        let view = self.collaborators.storage.open_for_tier(to).await?;

        {
            let mut state = self.state.write();
            if state.destroyed || state.lifecycle_state != LifecycleState::Online {
                return Ok(TickOutcome::Idle);
            }
            state.storage_tier = to;
        }
        let generation = self.tiers.install(view);
        self.metrics.record_migration();
        info!(
            partition = %self.coordinate,
            from = %from,
            to = %to,
            generation,
            elapsed_ms = timer.stop().as_millis() as u64,
            "Storage tier migrated"
        );

        self.release_drained().await?;
        Ok(TickOutcome::Migrated { from, to })
    }

    /// Release storage of retired generations whose handles have drained.
    /// Caller holds the maintenance lock.
    async fn release_drained(&self) -> Result<usize> {
        let drained = self.tiers.reap();
        for tier in &drained {
            self.collaborators.storage.release(*tier).await?;
            self.metrics.record_tier_released();
            debug!(partition = %self.coordinate, tier = %tier, "Released drained tier");
        }
        Ok(drained.len())
    }
}
