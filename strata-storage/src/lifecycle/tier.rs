//! Reference-counted tier generations.
//!
//! Readers load the current generation with an atomic pointer load and bump
//! its handle count; migration installs a new generation with an atomic swap
//! and parks the old one in a retired list. A retired generation's storage is
//! released only once its handle count has drained to zero. Neither side ever
//! waits on the other.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use strata_core::traits::IndexView;
use strata_core::StorageTier;

/// One installed view of a tier, with its outstanding handle count
pub struct TierGeneration {
    id: u64,
    tier: StorageTier,
    view: Arc<dyn IndexView>,
    outstanding: AtomicUsize,
}

impl TierGeneration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tier(&self) -> StorageTier {
        self.tier
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

/// Scoped access to the tier that was current at acquisition time
pub struct QueryHandle {
    generation: Arc<TierGeneration>,
}

impl QueryHandle {
    pub fn view(&self) -> &dyn IndexView {
        self.generation.view.as_ref()
    }

    pub fn tier(&self) -> StorageTier {
        self.generation.tier
    }

    pub fn generation(&self) -> u64 {
        self.generation.id
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.generation.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The current-tier pointer of one partition
pub struct TierSlot {
    current: ArcSwapOption<TierGeneration>,
    retired: Mutex<Vec<Arc<TierGeneration>>>,
    next_id: AtomicU64,
}

impl TierSlot {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            retired: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Acquire a handle on the current generation, if any.
    pub fn acquire(&self) -> Option<QueryHandle> {
        loop {
            let generation = self.current.load_full()?;
            generation.outstanding.fetch_add(1, Ordering::SeqCst);

            // A swap between the load and the increment would let a reaper see
            // zero handles; re-check and back off if we lost that race.
            let still_current = matches!(
                &*self.current.load(),
                Some(now) if Arc::ptr_eq(now, &generation)
            );
            if still_current {
                return Some(QueryHandle { generation });
            }
            generation.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Install `view` as the current generation, retiring the previous one
    pub fn install(&self, view: Arc<dyn IndexView>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let generation = Arc::new(TierGeneration {
            id,
            tier: view.tier(),
            view,
            outstanding: AtomicUsize::new(0),
        });
        if let Some(previous) = self.current.swap(Some(generation)) {
            self.retired.lock().push(previous);
        }
        id
    }

    /// Remove the current generation so no new handles can be acquired
    pub fn clear(&self) {
        if let Some(previous) = self.current.swap(None) {
            self.retired.lock().push(previous);
        }
    }

    pub fn current_tier(&self) -> Option<StorageTier> {
        (*self.current.load()).as_ref().map(|g| g.tier)
    }

    /// Activities indexed in the current generation
    pub fn current_len(&self) -> Option<usize> {
        (*self.current.load()).as_ref().map(|g| g.view.len())
    }

    pub fn current_generation(&self) -> Option<u64> {
        (*self.current.load()).as_ref().map(|g| g.id)
    }

    /// Drop retired generations with no outstanding handles and report which
    /// tiers may now be released. A tier is reported only when neither the
    /// current generation nor any still-retired generation is backed by it.
    pub fn reap(&self) -> Vec<StorageTier> {
        let current = self.current_tier();
        let mut retired = self.retired.lock();
        let mut drained = Vec::new();
        retired.retain(|generation| {
            if generation.outstanding() > 0 {
                return true;
            }
            if !drained.contains(&generation.tier) {
                drained.push(generation.tier);
            }
            false
        });
        drained.retain(|tier| Some(*tier) != current && !retired.iter().any(|g| g.tier == *tier));
        drained
    }

    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}

impl Default for TierSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::Activity;

    struct FixedView(StorageTier);

    impl IndexView for FixedView {
        fn tier(&self) -> StorageTier {
            self.0
        }

        fn len(&self) -> usize {
            0
        }

        fn find(&self, _term: &str, _limit: usize) -> Vec<Activity> {
            Vec::new()
        }
    }

    #[test]
    fn test_empty_slot_yields_nothing() {
        let slot = TierSlot::new();
        assert!(slot.acquire().is_none());
        assert!(slot.reap().is_empty());
    }

    #[test]
    fn test_retired_generation_released_after_handles_drain() {
        let slot = TierSlot::new();
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        let handle = slot.acquire().unwrap();
        assert_eq!(handle.tier(), StorageTier::Memory);

        slot.install(Arc::new(FixedView(StorageTier::Disk)));
        assert_eq!(slot.current_tier(), Some(StorageTier::Disk));

        // The old handle still reads the memory generation.
        assert_eq!(handle.view().tier(), StorageTier::Memory);
        assert!(slot.reap().is_empty());
        assert_eq!(slot.retired_count(), 1);

        drop(handle);
        assert_eq!(slot.reap(), vec![StorageTier::Memory]);
        assert_eq!(slot.retired_count(), 0);
    }

    #[test]
    fn test_reap_never_reports_current_tier() {
        let slot = TierSlot::new();
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        slot.install(Arc::new(FixedView(StorageTier::Disk)));
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        assert_eq!(slot.reap(), vec![StorageTier::Disk]);
    }

    #[test]
    fn test_tier_held_by_another_retired_generation_is_kept() {
        let slot = TierSlot::new();
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        let first = slot.acquire().unwrap();
        slot.install(Arc::new(FixedView(StorageTier::Disk)));
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        let second = slot.acquire().unwrap();
        slot.install(Arc::new(FixedView(StorageTier::Disk)));

        // The drained disk generation shares its tier with the current one.
        assert!(slot.reap().is_empty());
        assert_eq!(slot.retired_count(), 2);

        drop(first);
        assert!(slot.reap().is_empty());
        assert_eq!(second.tier(), StorageTier::Memory);
        assert_eq!(slot.retired_count(), 1);

        drop(second);
        assert_eq!(slot.reap(), vec![StorageTier::Memory]);
        assert_eq!(slot.retired_count(), 0);
    }

    #[test]
    fn test_clear_blocks_new_handles() {
        let slot = TierSlot::new();
        slot.install(Arc::new(FixedView(StorageTier::Memory)));
        slot.clear();
        assert!(slot.acquire().is_none());
        assert_eq!(slot.reap(), vec![StorageTier::Memory]);
    }
}
