//! # Replica Solver
//!
//! Races an ordered, lazily expanding sequence of replica attempts for one
//! partition.
//!
//! ```text
//!   t=0            escalation          escalation
//!   ├─ attempt r1 ────────────────────────────────────x (cancelled)
//!   │              ├─ attempt r2 ──────────x (failed)
//!   │              │                       ├─ attempt r3 ──✓ first completion wins
//!   ▼              ▼                       ▼
//! ```
//!
//! Attempts run on a shared worker pool. Waiting is on the completion set,
//! bounded by the escalation interval and the query deadline. Running out of
//! time or candidates yields `None`, never an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

use strata_core::{
    config::SolverConfig,
    error::{Error, Result},
    metrics::Metrics,
    PartitionCoordinate,
};

use crate::log::SolutionLog;
use crate::solvable::{CancelSource, Solvable};

/// Provenance of a successful solve
#[derive(Debug)]
pub struct SolverOutcome<A> {
    pub answer: A,
    /// Replica that produced the answer
    pub coordinate: PartitionCoordinate,
    pub elapsed_to_first_usable_result: Duration,
    /// Including cancellation and drain of the losing attempts
    pub elapsed_total: Duration,
    /// In submission order
    pub tried_coordinates: Vec<PartitionCoordinate>,
    pub log: SolutionLog,
}

type Attempt<A> = (PartitionCoordinate, Result<A>);

pub struct ReplicaSolver {
    config: SolverConfig,
    pool: Arc<Semaphore>,
    metrics: Metrics,
}

impl ReplicaSolver {
    pub fn new(config: SolverConfig, metrics: Metrics) -> Self {
        let pool = Arc::new(Semaphore::new(config.max_concurrent_attempts.max(1)));
        Self {
            config,
            pool,
            metrics,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Race `solvables` until one succeeds, candidates run out, or `deadline`.
    ///
    /// `suggested_escalation` overrides the configured default escalation
    /// interval. Every attempt still in flight when this returns has been
    /// cancelled and drained.
    pub async fn solve<A, I>(
        &self,
        solvables: I,
        suggested_escalation: Option<Duration>,
        deadline: Instant,
        log: &SolutionLog,
    ) -> Option<SolverOutcome<A>>
    where
        A: Send + 'static,
        I: IntoIterator<Item = Arc<dyn Solvable<A>>>,
    {
        let started = Instant::now();
        self.metrics.record_solver_call();

        let escalation = suggested_escalation.unwrap_or(self.config.default_escalation);
        let max_solvers = self.config.max_number_of_solvers.max(1);
        let mut pending = solvables.into_iter();
        let cancel = CancelSource::new();
        let mut in_flight: JoinSet<Attempt<A>> = JoinSet::new();
        let mut tried: Vec<PartitionCoordinate> = Vec::new();

        for _ in 0..self.config.initial_solvers.clamp(1, max_solvers) {
            if !self.submit(&mut pending, &cancel, &mut in_flight, &mut tried, log) {
                break;
            }
        }

        let winner = loop {
            if in_flight.is_empty() {
                log.record(format!("no replica left to try after {} attempts", tried.len()));
                break None;
            }
            let now = Instant::now();
            if now >= deadline {
                log.record("query deadline reached");
                break None;
            }
            let wait = deadline.saturating_duration_since(now).min(escalation);

            match tokio::time::timeout(wait, in_flight.join_next()).await {
                Ok(Some(Ok((coordinate, Ok(answer))))) => {
                    let elapsed = started.elapsed();
                    log.record(format!("{} answered after {:?}", coordinate, elapsed));
                    break Some((coordinate, answer, elapsed));
                }
                Ok(Some(Ok((coordinate, Err(e))))) => {
                    self.metrics.record_attempt_failure();
                    warn!(partition = %coordinate, code = e.error_code(), "Replica attempt failed: {}", e);
                    log.record(format!("{} failed: {}", coordinate, e));
                    if tried.len() < max_solvers {
                        self.submit(&mut pending, &cancel, &mut in_flight, &mut tried, log);
                    }
                }
                Ok(Some(Err(join_error))) => {
                    self.metrics.record_attempt_failure();
                    warn!("Replica attempt task died: {}", join_error);
                    log.record(format!("attempt task died: {}", join_error));
                    if tried.len() < max_solvers {
                        self.submit(&mut pending, &cancel, &mut in_flight, &mut tried, log);
                    }
                }
                Ok(None) => break None,
                Err(_) => {
                    if Instant::now() < deadline
                        && tried.len() < max_solvers
                        && self.submit(&mut pending, &cancel, &mut in_flight, &mut tried, log)
                    {
                        self.metrics.record_escalation();
                        debug!(attempts = tried.len(), "Escalated to another replica");
                    }
                }
            }
        };

        let outstanding = in_flight.len();
        if outstanding > 0 {
            cancel.cancel();
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
            self.metrics.record_attempts_cancelled(outstanding as u64);
            log.record(format!("cancelled {} outstanding attempts", outstanding));
        }

        match winner {
            Some((coordinate, answer, elapsed)) => {
                self.metrics.record_solver_success(elapsed);
                Some(SolverOutcome {
                    answer,
                    coordinate,
                    elapsed_to_first_usable_result: elapsed,
                    elapsed_total: started.elapsed(),
                    tried_coordinates: tried,
                    log: log.clone(),
                })
            }
            None => {
                self.metrics.record_fatal_timeout();
                None
            }
        }
    }

    /// Start the next attempt, if another candidate exists
    fn submit<A, I>(
        &self,
        pending: &mut I,
        cancel: &CancelSource,
        in_flight: &mut JoinSet<Attempt<A>>,
        tried: &mut Vec<PartitionCoordinate>,
        log: &SolutionLog,
    ) -> bool
    where
        A: Send + 'static,
        I: Iterator<Item = Arc<dyn Solvable<A>>>,
    {
        let Some(solvable) = pending.next() else {
            return false;
        };
        let coordinate = solvable.coordinate().clone();
        tried.push(coordinate.clone());
        self.metrics.record_attempt();
        log.record(format!("attempt {} against {}", tried.len(), coordinate));

        let pool = Arc::clone(&self.pool);
        let signal = cancel.signal();
        in_flight.spawn(async move {
            let result = match pool.acquire_owned().await {
                Ok(permit) => {
                    let result = solvable.solve(signal).await;
                    drop(permit);
                    result
                }
                Err(_) => Err(Error::Cancelled),
            };
            (coordinate, result)
        });
        true
    }
}
