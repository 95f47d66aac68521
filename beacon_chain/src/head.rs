use std::sync::Arc;

use arc_swap::ArcSwapOption;
use types::{
    beacon_state::BeaconState,
    containers::SignedBeaconBlock,
    primitives::{Slot, H256},
};

#[derive(Clone, Debug)]
pub struct Head {
    pub slot: Slot,
    pub root: H256,
    pub block: Arc<SignedBeaconBlock>,
    pub state: Arc<BeaconState>,
}

/// The current canonical head. Readers never block writers.
#[derive(Default)]
pub struct HeadCache {
    head: ArcSwapOption<Head>,
}

impl HeadCache {
    #[must_use]
    pub fn head(&self) -> Option<Arc<Head>> {
        self.head.load_full()
    }

    /// Returns the zero hash before the chain is started.
    #[must_use]
    pub fn head_root(&self) -> H256 {
        self.head
            .load()
            .as_ref()
            .map(|head| head.root)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn head_slot(&self) -> Slot {
        self.head
            .load()
            .as_ref()
            .map(|head| head.slot)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn head_block(&self) -> Option<Arc<SignedBeaconBlock>> {
        self.head().map(|head| Arc::clone(&head.block))
    }

    /// Returns a copy the caller may mutate.
    #[must_use]
    pub fn head_state(&self) -> Option<BeaconState> {
        self.head().map(|head| head.state.as_ref().clone())
    }

    #[must_use]
    pub fn head_state_without_copy(&self) -> Option<Arc<BeaconState>> {
        self.head().map(|head| Arc::clone(&head.state))
    }

    pub fn set(&self, head: Arc<Head>) {
        self.head.store(Some(head));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_reports_zero_root() {
        let cache = HeadCache::default();

        assert_eq!(cache.head_root(), H256::zero());
        assert_eq!(cache.head_slot(), 0);
        assert!(cache.head_state().is_none());
    }

    #[test]
    fn head_state_is_a_copy() {
        let cache = HeadCache::default();

        cache.set(Arc::new(Head {
            slot: 5,
            root: H256::repeat_byte(5),
            block: Arc::default(),
            state: Arc::new(BeaconState {
                slot: 5,
                ..BeaconState::default()
            }),
        }));

        let mut copy = cache.head_state().unwrap_or_default();
        copy.slot = 6;

        assert_eq!(cache.head_root(), H256::repeat_byte(5));
        assert_eq!(cache.head_state_without_copy().map(|state| state.slot), Some(5));
    }
}
