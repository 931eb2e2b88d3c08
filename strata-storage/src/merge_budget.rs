//! # Merge Budget
//!
//! Borrowable chit pools that bound background merge work without ever
//! blocking. A pool may be overdrawn down to `-max_overage`, so a merge that
//! must finish can always make progress with a small batch.
//!
//! ```text
//!   cap ──────────┐
//!                 │  normal borrowing
//!     0 ──────────┤
//!                 │  overage (soft backpressure)
//!  -max_overage ──┘  floor: try_borrow fails below this
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use strata_core::config::{MergeBudgetConfig, MergePoolConfig};

/// Class of merge work; each class draws from its own pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeClass {
    /// Long-lived compaction merges
    Persistent,
    /// Short-lived per-write merges (rebuild batches)
    Transient,
}

/// A signed, lock-free chit counter
#[derive(Debug)]
pub struct MergeBudget {
    remaining: AtomicI64,
    cap: i64,
    max_overage: i64,
}

impl MergeBudget {
    pub fn new(cap: i64, max_overage: i64) -> Self {
        Self {
            remaining: AtomicI64::new(cap),
            cap,
            max_overage: max_overage.max(0),
        }
    }

    pub fn from_config(config: &MergePoolConfig) -> Self {
        Self::new(config.cap, config.max_overage)
    }

    /// Take `n` chits if doing so keeps `remaining >= -max_overage`
    pub fn try_borrow(&self, n: i64) -> bool {
        if n < 0 {
            return false;
        }
        let floor = -self.max_overage;
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_sub(n)?;
                (next >= floor).then_some(next)
            })
            .is_ok()
    }

    /// Return `n` chits; never raises `remaining` above `cap`
    pub fn release(&self, n: i64) {
        if n <= 0 {
            return;
        }
        let cap = self.cap;
        // The closure always returns Some, so this cannot fail.
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(n).min(cap))
            });
    }

    /// Borrow `n` chits that are returned when the guard drops
    pub fn borrow(self: &Arc<Self>, n: i64) -> Option<MergeChits> {
        self.try_borrow(n).then(|| MergeChits {
            budget: Arc::clone(self),
            count: n,
        })
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn cap(&self) -> i64 {
        self.cap
    }

    pub fn max_overage(&self) -> i64 {
        self.max_overage
    }
}

/// Chits borrowed from a [`MergeBudget`], released on drop
#[derive(Debug)]
pub struct MergeChits {
    budget: Arc<MergeBudget>,
    count: i64,
}

impl MergeChits {
    pub fn count(&self) -> i64 {
        self.count
    }
}

impl Drop for MergeChits {
    fn drop(&mut self) {
        self.budget.release(self.count);
    }
}

/// The persistent and transient pools of one partition
#[derive(Debug, Clone)]
pub struct MergeBudgets {
    pub persistent: Arc<MergeBudget>,
    pub transient: Arc<MergeBudget>,
}

impl MergeBudgets {
    pub fn from_config(config: &MergeBudgetConfig) -> Self {
        Self {
            persistent: Arc::new(MergeBudget::from_config(&config.persistent)),
            transient: Arc::new(MergeBudget::from_config(&config.transient)),
        }
    }

    pub fn pool(&self, class: MergeClass) -> &Arc<MergeBudget> {
        match class {
            MergeClass::Persistent => &self.persistent,
            MergeClass::Transient => &self.transient,
        }
    }
}

impl Default for MergeBudgets {
    fn default() -> Self {
        Self::from_config(&MergeBudgetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_into_overage() {
        let budget = MergeBudget::new(10, 5);
        assert!(budget.try_borrow(10));
        assert_eq!(budget.remaining(), 0);
        assert!(budget.try_borrow(5));
        assert_eq!(budget.remaining(), -5);
        assert!(!budget.try_borrow(1));
        assert_eq!(budget.remaining(), -5);
    }

    #[test]
    fn test_release_is_capped() {
        let budget = MergeBudget::new(10, 0);
        assert!(budget.try_borrow(4));
        budget.release(100);
        assert_eq!(budget.remaining(), 10);
    }

    #[test]
    fn test_single_chit_always_available_within_overage() {
        let budget = MergeBudget::new(1, 1);
        assert!(budget.try_borrow(1));
        assert!(budget.try_borrow(1));
        assert!(!budget.try_borrow(1));
    }

    #[test]
    fn test_chits_release_on_drop() {
        let budget = Arc::new(MergeBudget::new(8, 0));
        {
            let chits = budget.borrow(6).expect("within cap");
            assert_eq!(chits.count(), 6);
            assert_eq!(budget.remaining(), 2);
            assert!(budget.borrow(3).is_none());
        }
        assert_eq!(budget.remaining(), 8);
    }

    #[test]
    fn test_pools_are_independent() {
        let budgets = MergeBudgets::from_config(&MergeBudgetConfig {
            persistent: MergePoolConfig { cap: 1, max_overage: 0 },
            transient: MergePoolConfig { cap: 100, max_overage: 0 },
        });
        assert!(budgets.pool(MergeClass::Persistent).try_borrow(1));
        assert!(!budgets.pool(MergeClass::Persistent).try_borrow(1));
        assert!(budgets.pool(MergeClass::Transient).try_borrow(50));
    }
}
