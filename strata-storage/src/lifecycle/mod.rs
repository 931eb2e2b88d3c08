//! # Partition Lifecycle
//!
//! Per-(tenant, partition) hosting state machine on one host. Owns the
//! partition's availability and storage tier, and keeps slow work (rebuild
//! from the activity log, migration to disk) off the query path.
//!
//! ## State Machine
//!
//! ```text
//!                 schema + active            housekeeping ok
//!   ┌─────────┐ ─────────────────> ┌───────────┐ ─────────────> ┌────────────┐
//!   │ Offline │                    │ Bootstrap │                │ Rebuilding │<──┐
//!   └─────────┘ <──────┐           └───────────┘                └─────┬──────┘   │
//!        ▲             │ inactive (after in-flight rebuild)           │ drained  │ forced
//!        │             │                                              ▼          │ rebuild
//!        │             │                                   ┌──────────────────┐  │
//!        │             └───────────────────────────────────│ Online(Mem|Disk) │  │
//!        │                                                 └────────┬─────────┘  │
//!        │ destroy (from anywhere, terminal)                        │ stale      │
//!        │                                                          ▼            │
//!        │                                                     ┌──────────┐      │
//!        └─────────────────────────────────────────────────────│ Obsolete │──────┘
//!                                                              └──────────┘
//! ```
//!
//! ## Module Structure
//!
//! - `tier.rs`  - Reference-counted tier generations and query handles
//! - `tasks.rs` - Bootstrap, rebuild and sip-migrate ticks

mod tasks;
mod tier;

pub use tasks::TickOutcome;
pub use tier::{QueryHandle, TierGeneration, TierSlot};

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use strata_core::{
    config::LifecycleConfig,
    error::{Error, Result},
    metrics::Metrics,
    traits::{ActivityLog, IndexStorage, SchemaRegistry, TopologyRegistry},
    LifecycleState, PartitionCoordinate, PartitionRuntimeState, Sequence, StorageTier,
};

use crate::merge_budget::MergeBudgets;
use crate::scheduler::{spawn_fixed_delay, TaskGate};

/// External collaborators one hosted partition talks to
#[derive(Clone)]
pub struct PartitionCollaborators {
    pub storage: Arc<dyn IndexStorage>,
    pub activity_log: Arc<dyn ActivityLog>,
    pub topology: Arc<dyn TopologyRegistry>,
    pub schemas: Arc<dyn SchemaRegistry>,
}

pub struct PartitionLifecycle {
    coordinate: PartitionCoordinate,
    config: LifecycleConfig,
    state: RwLock<PartitionRuntimeState>,
    tiers: TierSlot,
    collaborators: PartitionCollaborators,
    budgets: MergeBudgets,
    metrics: Metrics,
    bootstrap_gate: TaskGate,
    rebuild_gate: TaskGate,
    sip_migrate_gate: TaskGate,
    /// Serializes work that changes storage structure; ticks only `try_lock` it
    maintenance: tokio::sync::Mutex<()>,
    /// Log position a Rebuilding pass must reach before going online
    rebuild_target: Mutex<Option<Sequence>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PartitionLifecycle {
    /// Create a lifecycle in the Offline state. Nothing is scheduled until
    /// [`PartitionLifecycle::start`] is called.
    pub fn new(
        coordinate: PartitionCoordinate,
        config: LifecycleConfig,
        collaborators: PartitionCollaborators,
        budgets: MergeBudgets,
        metrics: Metrics,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        debug!(partition = %coordinate, "Observed partition, starting offline");
        Arc::new(Self {
            coordinate,
            config,
            state: RwLock::new(PartitionRuntimeState::offline()),
            tiers: TierSlot::new(),
            collaborators,
            budgets,
            metrics,
            bootstrap_gate: TaskGate::new("bootstrap"),
            rebuild_gate: TaskGate::new("rebuild"),
            sip_migrate_gate: TaskGate::new("sip_migrate"),
            maintenance: tokio::sync::Mutex::new(()),
            rebuild_target: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn coordinate(&self) -> &PartitionCoordinate {
        &self.coordinate
    }

    /// Consistent snapshot of the runtime state
    pub fn state(&self) -> PartitionRuntimeState {
        *self.state.read()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed
    }

    pub fn budgets(&self) -> &MergeBudgets {
        &self.budgets
    }

    pub fn tiers(&self) -> &TierSlot {
        &self.tiers
    }

    /// Schedule the three maintenance tasks at their fixed delays
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.is_destroyed() {
            return;
        }

        let weak = Arc::downgrade(self);
        tasks.push(spawn_fixed_delay(
            "bootstrap",
            self.config.bootstrap_delay,
            weak.clone(),
            self.shutdown.subscribe(),
            |lifecycle: Arc<PartitionLifecycle>| async move {
                let outcome = lifecycle.bootstrap_tick().await;
                lifecycle.log_scheduled("bootstrap", outcome);
            },
        ));
        tasks.push(spawn_fixed_delay(
            "rebuild",
            self.config.rebuild_delay,
            weak.clone(),
            self.shutdown.subscribe(),
            |lifecycle: Arc<PartitionLifecycle>| async move {
                let outcome = lifecycle.rebuild_tick().await;
                lifecycle.log_scheduled("rebuild", outcome);
            },
        ));
        tasks.push(spawn_fixed_delay(
            "sip_migrate",
            self.config.sip_migrate_delay,
            weak,
            self.shutdown.subscribe(),
            |lifecycle: Arc<PartitionLifecycle>| async move {
                let outcome = lifecycle.sip_migrate_tick().await;
                lifecycle.log_scheduled("sip_migrate", outcome);
            },
        ));
        info!(partition = %self.coordinate, "Scheduled partition maintenance");
    }

    fn log_scheduled(&self, task: &'static str, outcome: Result<TickOutcome>) {
        match outcome {
            Ok(TickOutcome::Idle) => {}
            Ok(outcome) => debug!(partition = %self.coordinate, task, ?outcome, "Maintenance tick"),
            Err(e) => error!(
                partition = %self.coordinate,
                task,
                code = e.error_code(),
                "Maintenance tick failed: {}",
                e
            ),
        }
    }

    /// Scoped access to the current tier's index view.
    ///
    /// Fails with `PartitionUnavailable` unless the partition is Online, or
    /// Rebuilding and `tolerate_rebuilding` is set. Never waits on migration.
    pub fn acquire_query_handle(&self, tolerate_rebuilding: bool) -> Result<QueryHandle> {
        let state = self.state();
        if state.is_queryable(tolerate_rebuilding) {
            if let Some(handle) = self.tiers.acquire() {
                self.metrics.record_handle_acquired();
                return Ok(handle);
            }
        }
        self.metrics.record_handle_rejected();
        Err(Error::PartitionUnavailable {
            coordinate: self.coordinate.clone(),
            state: state.lifecycle_state,
        })
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<bool> {
        self.transition_with(from, to, |_| {})
    }

    /// Move `from -> to` if the partition is still in `from`, applying `update`
    /// under the same write so readers never see a half-applied transition.
    /// Returns `false` when the state changed underneath the caller.
    fn transition_with<F>(&self, from: LifecycleState, to: LifecycleState, update: F) -> Result<bool>
    where
        F: FnOnce(&mut PartitionRuntimeState),
    {
        if !from.can_transition_to(to) {
            return Err(Error::IllegalTransition {
                coordinate: self.coordinate.clone(),
                from,
                to,
            });
        }

        {
            let mut state = self.state.write();
            if state.destroyed || state.lifecycle_state != from {
                debug!(
                    partition = %self.coordinate,
                    expected = %from,
                    actual = %state.lifecycle_state,
                    "Skipping stale transition"
                );
                return Ok(false);
            }
            state.lifecycle_state = to;
            update(&mut state);
        }

        self.metrics.record_transition();
        info!(
            tenant = %self.coordinate.tenant_id,
            partition = %self.coordinate.partition_id,
            host = %self.coordinate.host_id,
            from = %from,
            to = %to,
            "Partition lifecycle transition"
        );
        Ok(true)
    }

    fn ensure_not_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::PartitionDestroyed {
                coordinate: self.coordinate.clone(),
            });
        }
        Ok(())
    }

    /// Administrative: move an Online partition to `tier` via background copy
    /// and atomic swap. Returns `false` if it already serves from `tier` or
    /// the persistent merge budget cannot cover the copy right now.
    pub async fn force_tier(&self, tier: StorageTier) -> Result<bool> {
        self.ensure_not_destroyed()?;
        let _maintenance = self.maintenance.lock().await;

        let state = self.state();
        if state.lifecycle_state != LifecycleState::Online {
            return Err(Error::PartitionUnavailable {
                coordinate: self.coordinate.clone(),
                state: state.lifecycle_state,
            });
        }
        Ok(matches!(
            self.migrate_to(tier).await?,
            TickOutcome::Migrated { .. }
        ))
    }

    /// Administrative: tear the index down and go Offline without destroying.
    /// The bootstrap task may bring the partition back if topology still
    /// lists it as active.
    pub async fn take_offline(&self) -> Result<bool> {
        self.ensure_not_destroyed()?;
        let _maintenance = self.maintenance.lock().await;

        let current = self.state().lifecycle_state;
        if current == LifecycleState::Offline {
            return Ok(false);
        }
        Ok(matches!(
            self.go_offline(current).await?,
            TickOutcome::Transitioned { .. }
        ))
    }

    /// Administrative: terminal removal. Stops scheduled tasks and closes storage.
    pub async fn destroy(&self) -> Result<()> {
        let from = {
            let mut state = self.state.write();
            if state.destroyed {
                return Ok(());
            }
            let from = state.lifecycle_state;
            state.destroyed = true;
            state.lifecycle_state = LifecycleState::Offline;
            from
        };
        self.metrics.record_transition();
        info!(partition = %self.coordinate, from = %from, "Partition destroyed");

        self.shutdown.send_replace(true);

        // Let an in-flight tick finish before closing storage under it.
        let _maintenance = self.maintenance.lock().await;
        self.tiers.clear();
        self.rebuild_target.lock().take();
        self.collaborators.storage.close().await?;
        self.tiers.reap();
        Ok(())
    }
}

impl Drop for PartitionLifecycle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
