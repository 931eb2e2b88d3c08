//! # Maintenance Scheduling
//!
//! Fixed-delay background tasks with skip-if-busy ticks.
//!
//! ```text
//!   ──[run]──delay──[run.........]──delay──[run]──
//!                                ▲
//!        a slow run pushes the next start back; ticks never queue up
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Atomic "running" flag for one task type
#[derive(Debug)]
pub struct TaskGate {
    name: &'static str,
    running: AtomicBool,
}

impl TaskGate {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    /// Enter the gate, or `None` if the previous run is still executing
    pub fn try_enter(&self) -> Option<GateGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct GateGuard<'a> {
    gate: &'a TaskGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

/// Spawn a fixed-delay loop that runs `run` against `target` until shutdown.
///
/// The loop holds only a `Weak` reference between runs, so dropping the last
/// strong reference to `target` also ends the task.
pub fn spawn_fixed_delay<T, F, Fut>(
    name: &'static str,
    delay: Duration,
    target: Weak<T>,
    mut shutdown: watch::Receiver<bool>,
    run: F,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(task = name, "Shutting down maintenance task");
                        break;
                    }
                    continue;
                }
            }

            let Some(target) = target.upgrade() else {
                debug!(task = name, "Owner dropped, stopping maintenance task");
                break;
            };
            run(target).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_gate_skips_reentry() {
        let gate = TaskGate::new("rebuild");
        let first = gate.try_enter();
        assert!(first.is_some());
        assert!(gate.try_enter().is_none());
        drop(first);
        assert!(!gate.is_running());
        assert!(gate.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_runs_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let handle = spawn_fixed_delay(
            "count",
            Duration::from_millis(10),
            Arc::downgrade(&counter),
            rx,
            |counter: Arc<AtomicUsize>| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let runs = counter.load(Ordering::SeqCst);
        assert!((4..=5).contains(&runs), "runs = {}", runs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_stops_when_owner_dropped() {
        let owner = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = watch::channel(false);
        let handle = spawn_fixed_delay(
            "owned",
            Duration::from_millis(5),
            Arc::downgrade(&owner),
            rx,
            |_owner: Arc<AtomicUsize>| async {},
        );
        drop(owner);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
    }
}
