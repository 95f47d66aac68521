use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use parking_lot::RwLock;
use state_gen::Storage;
use tracing::debug;
use types::{containers::SignedBeaconBlock, primitives::H256};

/// Blocks imported during initial sync that have not been written to storage yet.
#[derive(Default)]
pub struct InitSyncBlockCache {
    blocks: RwLock<HashMap<H256, Arc<SignedBeaconBlock>>>,
}

impl InitSyncBlockCache {
    pub fn insert(&self, root: H256, block: Arc<SignedBeaconBlock>) {
        self.blocks.write().insert(root, block);
    }

    #[must_use]
    pub fn contains(&self, root: H256) -> bool {
        self.blocks.read().contains_key(&root)
    }

    #[must_use]
    pub fn get(&self, root: H256) -> Option<Arc<SignedBeaconBlock>> {
        self.blocks.read().get(&root).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Writes all cached blocks to `storage` and empties the cache.
    pub fn flush(&self, storage: &Storage) -> Result<usize> {
        let mut blocks = self.blocks.write();

        if blocks.is_empty() {
            return Ok(0);
        }

        storage.save_blocks(blocks.iter().map(|(root, block)| (*root, block.as_ref())))?;

        let flushed = blocks.len();

        blocks.clear();

        debug!(flushed, "init sync blocks written to storage");

        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_moves_blocks_to_storage() -> Result<()> {
        let storage = Storage::in_memory();
        let cache = InitSyncBlockCache::default();
        let root = H256::repeat_byte(1);

        cache.insert(
            root,
            Arc::new(SignedBeaconBlock {
                message: types::containers::BeaconBlock {
                    slot: 1,
                    ..Default::default()
                },
                ..Default::default()
            }),
        );

        assert!(cache.contains(root));
        assert!(!storage.has_block(root)?);

        assert_eq!(cache.flush(&storage)?, 1);

        assert!(cache.is_empty());
        assert!(storage.has_block(root)?);
        assert_eq!(cache.flush(&storage)?, 0);

        Ok(())
    }
}
