//! # Core Types
//!
//! Identity keys and runtime state shared by the storage and query crates.
//!
//! ## Type Design Philosophy
//!
//! 1. **Identity is immutable**: a `PartitionCoordinate` never changes once observed
//! 2. **Snapshots are `Copy`**: readers get a whole `PartitionRuntimeState`, never a torn one
//! 3. **Ordering is meaningful**: larger `PartitionId` means newer data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the system
pub type Timestamp = DateTime<Utc>;

/// Sequence number of a record in the activity log. `-1` means "nothing yet".
pub type Sequence = i64;

/// Sentinel for a partition that has not indexed anything.
pub const NO_SEQUENCE: Sequence = -1;

/// Tenant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic partition number. Partitions are time-ordered; larger is newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity key of one hosted partition replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionCoordinate {
    pub tenant_id: TenantId,
    pub partition_id: PartitionId,
    pub host_id: HostId,
}

impl PartitionCoordinate {
    pub fn new(tenant_id: TenantId, partition_id: PartitionId, host_id: HostId) -> Self {
        Self {
            tenant_id,
            partition_id,
            host_id,
        }
    }
}

impl fmt::Display for PartitionCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.tenant_id, self.partition_id, self.host_id)
    }
}

/// Hosting state of a partition replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Offline,
    Bootstrap,
    Rebuilding,
    Online,
    /// Disk copy exists but must be rebuilt before it may serve again.
    Obsolete,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 5] = [
        LifecycleState::Offline,
        LifecycleState::Bootstrap,
        LifecycleState::Rebuilding,
        LifecycleState::Online,
        LifecycleState::Obsolete,
    ];

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `Offline` only leads to `Bootstrap`: a partition comes online through
    /// a rebuild or not at all.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Offline, Bootstrap)
                | (Bootstrap, Rebuilding)
                | (Rebuilding, Online)
                | (Online, Obsolete)
                | (Obsolete, Rebuilding)
                | (Bootstrap, Offline)
                | (Rebuilding, Offline)
                | (Online, Offline)
                | (Obsolete, Offline)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Offline => "offline",
            LifecycleState::Bootstrap => "bootstrap",
            LifecycleState::Rebuilding => "rebuilding",
            LifecycleState::Online => "online",
            LifecycleState::Obsolete => "obsolete",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backing tier of a partition's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageTier {
    Memory,
    Disk,
}

impl StorageTier {
    pub fn other(self) -> Self {
        match self {
            StorageTier::Memory => StorageTier::Disk,
            StorageTier::Disk => StorageTier::Memory,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Memory => "memory",
            StorageTier::Disk => "disk",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageTier::Memory),
            "disk" => Ok(StorageTier::Disk),
            other => Err(format!("unknown storage tier: {}", other)),
        }
    }
}

/// Point-in-time view of a hosted partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRuntimeState {
    pub lifecycle_state: LifecycleState,
    pub storage_tier: StorageTier,
    pub destroyed: bool,
    pub last_indexed_sequence: Sequence,
}

impl PartitionRuntimeState {
    pub fn offline() -> Self {
        Self {
            lifecycle_state: LifecycleState::Offline,
            storage_tier: StorageTier::Memory,
            destroyed: false,
            last_indexed_sequence: NO_SEQUENCE,
        }
    }

    pub fn is_queryable(&self, tolerate_rebuilding: bool) -> bool {
        match self.lifecycle_state {
            LifecycleState::Online => true,
            LifecycleState::Rebuilding => tolerate_rebuilding,
            _ => false,
        }
    }
}

impl Default for PartitionRuntimeState {
    fn default() -> Self {
        Self::offline()
    }
}

/// One record of the activity write-ahead log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub terms: Vec<String>,
    pub payload: String,
}

impl Activity {
    pub fn new(sequence: Sequence, terms: Vec<String>, payload: impl Into<String>) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            terms,
            payload: payload.into(),
        }
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.terms.iter().any(|t| t == term)
    }

    /// Rough in-memory footprint, used for migration thresholds.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Activity>()
            + self.payload.len()
            + self.terms.iter().map(|t| t.len() + std::mem::size_of::<String>()).sum::<usize>()
    }
}

/// Result of one `ActivityLog::read_since` call.
#[derive(Debug, Clone, Default)]
pub struct ActivityBatch {
    pub activities: Vec<Activity>,
    pub end_of_stream: bool,
}

/// One partition in query order, with the replicas that may answer for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReplicas {
    pub partition_id: PartitionId,
    pub replicas: Vec<PartitionCoordinate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_only_leads_to_bootstrap() {
        for next in LifecycleState::ALL {
            let allowed = LifecycleState::Offline.can_transition_to(next);
            assert_eq!(allowed, next == LifecycleState::Bootstrap, "offline -> {}", next);
        }
    }

    #[test]
    fn test_obsolete_is_followed_by_rebuild() {
        assert!(LifecycleState::Online.can_transition_to(LifecycleState::Obsolete));
        assert!(LifecycleState::Obsolete.can_transition_to(LifecycleState::Rebuilding));
        assert!(!LifecycleState::Obsolete.can_transition_to(LifecycleState::Online));
    }

    #[test]
    fn test_queryability() {
        let mut state = PartitionRuntimeState::offline();
        assert!(!state.is_queryable(true));

        state.lifecycle_state = LifecycleState::Rebuilding;
        assert!(!state.is_queryable(false));
        assert!(state.is_queryable(true));

        state.lifecycle_state = LifecycleState::Online;
        state.storage_tier = StorageTier::Disk;
        assert!(state.is_queryable(false));
    }

    #[test]
    fn test_partition_ordering_newest_is_largest() {
        let mut ids = vec![PartitionId(3), PartitionId(10), PartitionId(1)];
        ids.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, vec![PartitionId(10), PartitionId(3), PartitionId(1)]);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("Disk".parse::<StorageTier>().unwrap(), StorageTier::Disk);
        assert_eq!("mem".parse::<StorageTier>().unwrap(), StorageTier::Memory);
        assert!("tape".parse::<StorageTier>().is_err());
    }
}
