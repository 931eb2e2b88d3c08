//! Merge budget concurrency tests

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use rand::Rng;

use strata_core::config::MergeBudgetConfig;
use strata_storage::{MergeBudget, MergeBudgets, MergeClass};

#[test]
fn test_concurrent_borrowers_respect_floor_and_return_everything() {
    let budget = Arc::new(MergeBudget::new(64, 16));
    let lowest = Arc::new(AtomicI64::new(i64::MAX));
    let granted = Arc::new(AtomicU64::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let budget = budget.clone();
            let lowest = lowest.clone();
            let granted = granted.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..2_000 {
                    let n = rng.gen_range(1..=24);
                    if let Some(chits) = budget.borrow(n) {
                        lowest.fetch_min(budget.remaining(), Ordering::SeqCst);
                        granted.fetch_add(1, Ordering::Relaxed);
                        if rng.gen_bool(0.3) {
                            thread::yield_now();
                        }
                        drop(chits);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(lowest.load(Ordering::SeqCst) >= -16);
    assert!(granted.load(Ordering::Relaxed) > 0);
    assert_eq!(budget.remaining(), 64);
}

#[test]
fn test_borrowers_eventually_succeed_after_release() {
    let budget = Arc::new(MergeBudget::new(10, 0));
    let held = budget.borrow(10).unwrap();
    assert!(budget.borrow(1).is_none());

    let waiter = {
        let budget = budget.clone();
        thread::spawn(move || {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                if budget.borrow(5).is_some() {
                    return attempts;
                }
                thread::yield_now();
            }
        })
    };

    thread::sleep(std::time::Duration::from_millis(5));
    drop(held);
    assert!(waiter.join().unwrap() >= 1);
    assert_eq!(budget.remaining(), 10);
}

#[test]
fn test_default_pools_sized_from_config() {
    let budgets = MergeBudgets::from_config(&MergeBudgetConfig::default());
    let transient = budgets.pool(MergeClass::Transient).borrow(100_000).unwrap();
    assert_eq!(budgets.pool(MergeClass::Transient).remaining(), 0);
    assert_eq!(budgets.pool(MergeClass::Persistent).remaining(), 10_000);
    drop(transient);
    assert_eq!(budgets.transient.remaining(), 100_000);
}
