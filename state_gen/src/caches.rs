use core::num::NonZeroUsize;
use std::{collections::HashMap, sync::Arc};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use types::{
    beacon_state::BeaconState,
    primitives::{Slot, H256},
};

/// Post-states of recently imported blocks.
pub struct HotStateCache {
    states: Mutex<LruCache<H256, Arc<BeaconState>>>,
}

impl HotStateCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, root: H256) -> Option<Arc<BeaconState>> {
        self.states.lock().get(&root).cloned()
    }

    pub fn put(&self, root: H256, state: Arc<BeaconState>) {
        self.states.lock().put(root, state);
    }

    pub fn contains(&self, root: H256) -> bool {
        self.states.lock().contains(&root)
    }

    pub fn delete(&self, root: H256) {
        self.states.lock().pop(&root);
    }

    /// Drops states older than `slot`.
    pub fn prune_before(&self, slot: Slot) {
        let mut states = self.states.lock();

        let stale = states
            .iter()
            .filter(|(_, state)| state.slot < slot)
            .map(|(root, _)| *root)
            .collect::<Vec<_>>();

        for root in stale {
            states.pop(&root);
        }
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }
}

/// States at epoch boundaries, one per boundary block root.
pub struct EpochBoundaryCache {
    states: Mutex<LruCache<H256, Arc<BeaconState>>>,
}

impl EpochBoundaryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            states: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, root: H256) -> Option<Arc<BeaconState>> {
        self.states.lock().get(&root).cloned()
    }

    /// Inserts `state` unless a state for `root` is already present.
    pub fn put(&self, root: H256, state: Arc<BeaconState>) {
        let mut states = self.states.lock();

        if !states.contains(&root) {
            states.put(root, state);
        }
    }

    pub fn contains(&self, root: H256) -> bool {
        self.states.lock().contains(&root)
    }

    pub fn delete(&self, root: H256) {
        self.states.lock().pop(&root);
    }

    pub fn prune_before(&self, slot: Slot) {
        let mut states = self.states.lock();

        let stale = states
            .iter()
            .filter(|(_, state)| state.slot < slot)
            .map(|(root, _)| *root)
            .collect::<Vec<_>>();

        for root in stale {
            states.pop(&root);
        }
    }
}

/// States produced during initial sync. Entries are shared without copying.
#[derive(Default)]
pub struct SyncStateCache {
    states: RwLock<HashMap<H256, Arc<BeaconState>>>,
}

impl SyncStateCache {
    pub fn get(&self, root: H256) -> Option<Arc<BeaconState>> {
        self.states.read().get(&root).cloned()
    }

    pub fn put(&self, root: H256, state: Arc<BeaconState>) {
        self.states.write().insert(root, state);
    }

    pub fn contains(&self, root: H256) -> bool {
        self.states.read().contains_key(&root)
    }

    pub fn delete(&self, root: H256) {
        self.states.write().remove(&root);
    }

    pub fn clear(&self) {
        self.states.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;

    use super::*;

    fn state_at_slot(slot: Slot) -> Arc<BeaconState> {
        Arc::new(BeaconState {
            slot,
            ..BeaconState::default()
        })
    }

    #[test]
    fn hot_cache_evicts_least_recently_used() {
        let cache = HotStateCache::new(nonzero!(2_usize));

        cache.put(H256::repeat_byte(1), state_at_slot(1));
        cache.put(H256::repeat_byte(2), state_at_slot(2));
        cache.get(H256::repeat_byte(1));
        cache.put(H256::repeat_byte(3), state_at_slot(3));

        assert!(cache.contains(H256::repeat_byte(1)));
        assert!(!cache.contains(H256::repeat_byte(2)));
        assert_eq!(cache.len(), 2);

        cache.prune_before(3);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn epoch_boundary_cache_keeps_the_first_state_per_root() {
        let cache = EpochBoundaryCache::new(nonzero!(4_usize));
        let root = H256::repeat_byte(1);

        cache.put(root, state_at_slot(8));
        cache.put(root, state_at_slot(16));

        assert_eq!(cache.get(root).map(|state| state.slot), Some(8));
    }
}
