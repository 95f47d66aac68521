use parking_lot::Mutex;
use types::{beacon_state::BeaconState, primitives::H256};

/// Holds the post-state of the latest block advanced by one slot.
///
/// Filled in the background after a block is imported so that the next block can skip slot
/// processing.
#[derive(Default)]
pub struct NextSlotCache {
    entry: Mutex<Option<(H256, BeaconState)>>,
}

impl NextSlotCache {
    #[must_use]
    pub fn get(&self, block_root: H256) -> Option<BeaconState> {
        self.entry
            .lock()
            .as_ref()
            .filter(|(root, _)| *root == block_root)
            .map(|(_, state)| state.clone())
    }

    pub fn put(&self, block_root: H256, state: BeaconState) {
        *self.entry.lock() = Some((block_root, state));
    }

    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}
