use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use state_gen::Storage;
use tracing::debug;
use types::{beacon_state::BeaconState, primitives::H256};

/// Deposit contract state as of the latest finalized checkpoint.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Deserialize, Serialize)]
pub struct DepositSnapshot {
    pub finalized_root: H256,
    pub deposit_count: u64,
    pub eth1_block_hash: H256,
    pub deposit_root: H256,
}

#[derive(Default)]
pub struct DepositTrie {
    snapshot: RwLock<DepositSnapshot>,
}

impl DepositTrie {
    pub fn load(storage: &Storage) -> Result<Self> {
        let snapshot = storage.deposit_trie()?.unwrap_or_default();

        Ok(Self {
            snapshot: RwLock::new(snapshot),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> DepositSnapshot {
        *self.snapshot.read()
    }

    /// Advances the snapshot to the deposits processed by the finalized `state`.
    ///
    /// Returns `false` if `state` has processed fewer deposits than already recorded.
    pub fn insert_finalized(
        &self,
        storage: &Storage,
        finalized_root: H256,
        state: &BeaconState,
    ) -> Result<bool> {
        let mut snapshot = self.snapshot.write();

        if state.eth1_deposit_index < snapshot.deposit_count {
            debug!(
                deposit_count = state.eth1_deposit_index,
                recorded = snapshot.deposit_count,
                "finalized state is behind deposit trie",
            );

            return Ok(false);
        }

        let new_snapshot = DepositSnapshot {
            finalized_root,
            deposit_count: state.eth1_deposit_index,
            eth1_block_hash: state.eth1_data.block_hash,
            deposit_root: state.eth1_data.deposit_root,
        };

        storage.save_deposit_trie(&new_snapshot)?;

        *snapshot = new_snapshot;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_deposits(deposit_count: u64) -> BeaconState {
        BeaconState {
            eth1_deposit_index: deposit_count,
            ..BeaconState::default()
        }
    }

    #[test]
    fn snapshot_only_moves_forward_and_persists() -> Result<()> {
        let storage = Storage::in_memory();
        let trie = DepositTrie::load(&storage)?;

        assert!(trie.insert_finalized(&storage, H256::repeat_byte(1), &state_with_deposits(8))?);
        assert!(!trie.insert_finalized(&storage, H256::repeat_byte(2), &state_with_deposits(4))?);

        assert_eq!(trie.snapshot().finalized_root, H256::repeat_byte(1));

        let reloaded = DepositTrie::load(&storage)?;

        assert_eq!(reloaded.snapshot(), trie.snapshot());

        Ok(())
    }
}
