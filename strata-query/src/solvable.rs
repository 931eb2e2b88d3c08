//! One cancellable attempt to answer a query against one replica.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::watch;

use strata_core::{error::Result, PartitionCoordinate};

/// Receiving side of a cooperative cancellation signal
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested, or the source is gone
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Sending side; one per solver call
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// An attempt to answer against the replica at `coordinate`.
///
/// Implementations should return promptly once `cancel` fires; the solver
/// also aborts the task, so a slow implementation is never awaited.
#[async_trait]
pub trait Solvable<A: Send + 'static>: Send + Sync {
    fn coordinate(&self) -> &PartitionCoordinate;

    async fn solve(&self, cancel: CancelSignal) -> Result<A>;
}

/// A [`Solvable`] backed by a closure
pub struct FnSolvable<F> {
    coordinate: PartitionCoordinate,
    f: F,
}

impl<F> FnSolvable<F> {
    pub fn new(coordinate: PartitionCoordinate, f: F) -> Self {
        Self { coordinate, f }
    }
}

#[async_trait]
impl<A, F, Fut> Solvable<A> for FnSolvable<F>
where
    A: Send + 'static,
    F: Fn(CancelSignal) -> Fut + Send + Sync,
    Fut: Future<Output = Result<A>> + Send,
{
    fn coordinate(&self) -> &PartitionCoordinate {
        &self.coordinate
    }

    async fn solve(&self, cancel: CancelSignal) -> Result<A> {
        (self.f)(cancel).await
    }
}
