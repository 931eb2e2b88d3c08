//! # Strata Query
//!
//! Adaptive distributed query solving:
//! - `solvable`     - One cancellable attempt against one replica
//! - `solver`       - Races replica attempts for one partition with adaptive fan-out
//! - `orchestrator` - Sweeps partitions newest-first, merging partial answers
//! - `merge`        - Merger / Evaluator / Done strategies
//! - `latency`      - Escalation intervals learned from past latency
//! - `local`        - Attempts against partitions hosted in-process
//! - `log`          - Per-query diagnostic log

pub mod latency;
pub mod local;
pub mod log;
pub mod merge;
pub mod orchestrator;
pub mod solvable;
pub mod solver;

pub use latency::RollingLatencyHistory;
pub use local::{LocalSolvable, LocalSolvableFactory};
pub use log::{LogEntry, SolutionLog};
pub use merge::{Done, Evaluator, LimitEvaluator, Merger, OrDefault, UnionMerger};
pub use orchestrator::{
    CrossPartitionOrchestrator, OrchestratorResult, PartitionOutcome, QueryRequest,
    SolvableFactory,
};
pub use solvable::{CancelSignal, CancelSource, FnSolvable, Solvable};
pub use solver::{ReplicaSolver, SolverOutcome};
