//! # Strata Core
//!
//! This crate provides the shared building blocks for Strata:
//! - Partition identity and runtime state types
//! - Collaborator traits (index storage, activity log, topology, ordering, latency)
//! - Error types
//! - Configuration
//! - Metrics and logging setup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   strata-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • types    - Coordinates, lifecycle state      │
//! │  • traits   - Collaborator interfaces           │
//! │  • error    - Error handling                    │
//! │  • config   - Component configuration           │
//! │  • metrics  - Counters and histograms           │
//! │  • logging  - tracing subscriber setup          │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use types::{
    Activity, ActivityBatch, HostId, LifecycleState, PartitionCoordinate, PartitionId,
    PartitionReplicas, PartitionRuntimeState, Sequence, StorageTier, TenantId, Timestamp,
    NO_SEQUENCE,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
