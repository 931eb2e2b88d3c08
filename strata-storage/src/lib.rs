//! # Strata Storage
//!
//! Partition hosting for one machine: when a partition's index is safe to
//! query, and which storage tier serves it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PartitionHost                          │
//! │                                                             │
//! │  coordinate ──> PartitionLifecycle ──> TierSlot ──> IndexView│
//! │                    │        │                               │
//! │       bootstrap ───┤        └── MergeBudgets (chits)        │
//! │       rebuild ─────┤                                        │
//! │       sip-migrate ─┘                                        │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Query Path                             │
//! │                                                             │
//! │  HostedPartitionOrdering ──> acquire_query_handle ──> find  │
//! │     (newest first)             (lock-free, never waits)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod host;
pub mod lifecycle;
pub mod memory;
pub mod merge_budget;
pub mod ordering;
pub mod scheduler;

pub use host::{CollaboratorFactory, PartitionHost};
pub use lifecycle::{PartitionCollaborators, PartitionLifecycle, QueryHandle, TickOutcome};
pub use memory::{
    InMemoryActivityLog, InMemoryCollaborators, InMemoryIndexStorage, StaticSchemaRegistry,
    StaticTopology,
};
pub use merge_budget::{MergeBudget, MergeBudgets, MergeChits, MergeClass};
pub use ordering::{HostDirectory, HostedPartitionOrdering};
