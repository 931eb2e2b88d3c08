//! Term lookups against partitions hosted in this process.

use std::sync::Arc;

use async_trait::async_trait;

use strata_core::{
    error::{Error, Result},
    Activity, PartitionCoordinate,
};
use strata_storage::{HostDirectory, PartitionLifecycle};

use crate::orchestrator::SolvableFactory;
use crate::solvable::{CancelSignal, Solvable};

/// Finds the newest activities carrying `term` in one hosted replica
pub struct LocalSolvable {
    coordinate: PartitionCoordinate,
    lifecycle: Option<Arc<PartitionLifecycle>>,
    term: String,
    limit: usize,
    tolerate_rebuilding: bool,
}

#[async_trait]
impl Solvable<Vec<Activity>> for LocalSolvable {
    fn coordinate(&self) -> &PartitionCoordinate {
        &self.coordinate
    }

    async fn solve(&self, cancel: CancelSignal) -> Result<Vec<Activity>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(lifecycle) = &self.lifecycle else {
            return Err(Error::ReplicaAttemptFailed {
                coordinate: self.coordinate.clone(),
                message: "replica is not hosted".into(),
            });
        };

        let handle = lifecycle
            .acquire_query_handle(self.tolerate_rebuilding)
            .map_err(|e| Error::ReplicaAttemptFailed {
                coordinate: self.coordinate.clone(),
                message: e.to_string(),
            })?;
        Ok(handle.view().find(&self.term, self.limit))
    }
}

/// Builds [`LocalSolvable`]s by resolving coordinates through a [`HostDirectory`]
pub struct LocalSolvableFactory {
    directory: Arc<HostDirectory>,
    term: String,
    limit: usize,
    tolerate_rebuilding: bool,
}

impl LocalSolvableFactory {
    pub fn new(directory: Arc<HostDirectory>, term: impl Into<String>, limit: usize) -> Self {
        Self {
            directory,
            term: term.into(),
            limit,
            tolerate_rebuilding: false,
        }
    }

    pub fn tolerate_rebuilding(mut self, tolerate: bool) -> Self {
        self.tolerate_rebuilding = tolerate;
        self
    }
}

impl SolvableFactory<Vec<Activity>> for LocalSolvableFactory {
    fn solvable(&self, coordinate: &PartitionCoordinate) -> Arc<dyn Solvable<Vec<Activity>>> {
        let lifecycle = self
            .directory
            .get(&coordinate.host_id)
            .and_then(|host| host.get(coordinate));
        Arc::new(LocalSolvable {
            coordinate: coordinate.clone(),
            lifecycle,
            term: self.term.clone(),
            limit: self.limit,
            tolerate_rebuilding: self.tolerate_rebuilding,
        })
    }
}
